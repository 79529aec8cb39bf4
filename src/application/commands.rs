use crate::application::bootstrap::{BootstrapResult, bootstrap_workspace};
use crate::application::poll_loop::{CycleOutcome, SwitchSyncService};
use crate::application::probe::TimingsProbe;
use crate::application::reconciler::{ReconcileSummary, Reconciler};
use crate::infrastructure::config::{ConfigBundle, load_configs};
use crate::infrastructure::credential_store::{CredentialStore, resolve_api_key};
use crate::infrastructure::device_client::ReqwestDeviceRpcClient;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::logging::init_tracing;
use crate::infrastructure::notifier::{Escalation, EscalationNotifier, LogNotifier, WebhookNotifier};
use crate::infrastructure::timings_client::ReqwestTimingsClient;
use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const TIMINGS_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub type LiveSyncService = SwitchSyncService<
    ReqwestTimingsClient,
    ReqwestDeviceRpcClient,
    ReqwestDeviceRpcClient,
    ConfiguredNotifier,
>;
pub type LiveProbe = TimingsProbe<ReqwestTimingsClient, ReqwestDeviceRpcClient>;

/// Webhook when `escalationWebhookUrl` is set, log-only otherwise.
#[derive(Debug, Clone)]
pub enum ConfiguredNotifier {
    Log(LogNotifier),
    Webhook(WebhookNotifier),
}

impl ConfiguredNotifier {
    pub fn from_webhook_url(url: Option<&str>) -> Self {
        match url.map(str::trim).filter(|value| !value.is_empty()) {
            Some(url) => ConfiguredNotifier::Webhook(WebhookNotifier::new(url)),
            None => ConfiguredNotifier::Log(LogNotifier),
        }
    }
}

#[async_trait]
impl EscalationNotifier for ConfiguredNotifier {
    async fn notify(&self, escalation: &Escalation) -> Result<(), InfraError> {
        match self {
            ConfiguredNotifier::Log(notifier) => notifier.notify(escalation).await,
            ConfiguredNotifier::Webhook(notifier) => notifier.notify(escalation).await,
        }
    }
}

/// Loaded workspace: directories, validated configuration and tracing.
pub struct AppState {
    paths: BootstrapResult,
    configs: ConfigBundle,
}

impl AppState {
    pub fn load(workspace_root: &Path) -> Result<Self, InfraError> {
        let paths = bootstrap_workspace(workspace_root)?;
        let configs = load_configs(&paths.config_dir)?;
        init_tracing(&paths.logs_dir, configs.app.log_level.as_deref())?;
        info!(
            workspace = %paths.workspace_root.display(),
            timezone = %configs.time_zone,
            "workspace loaded"
        );
        Ok(Self { paths, configs })
    }

    pub fn paths(&self) -> &BootstrapResult {
        &self.paths
    }

    pub fn configs(&self) -> &ConfigBundle {
        &self.configs
    }

    pub fn sync_service<S>(&self, store: &S) -> Result<LiveSyncService, InfraError>
    where
        S: CredentialStore + ?Sized,
    {
        let timings = self.timings_client(store)?;
        let webhook_url = self.configs.sync.escalation_webhook_url.as_deref();
        let notifier = ConfiguredNotifier::from_webhook_url(webhook_url);
        Ok(SwitchSyncService::new(
            Arc::new(timings),
            self.reconciler()?,
            Arc::new(notifier),
            self.configs.sync.clone(),
            self.configs.time_zone,
        ))
    }

    pub fn probe<S>(&self, store: &S) -> Result<LiveProbe, InfraError>
    where
        S: CredentialStore + ?Sized,
    {
        Ok(TimingsProbe::new(
            Arc::new(self.timings_client(store)?),
            Arc::new(ReqwestDeviceRpcClient::new(&self.configs.device)?),
            self.configs.sync.clone(),
            self.configs.time_zone,
        ))
    }

    pub fn reconciler(
        &self,
    ) -> Result<Reconciler<ReqwestDeviceRpcClient, ReqwestDeviceRpcClient>, InfraError> {
        let device = Arc::new(ReqwestDeviceRpcClient::new(&self.configs.device)?);
        Ok(
            Reconciler::new(Arc::clone(&device), device, self.configs.time_zone)
                .with_call_spacing(Duration::from_millis(self.configs.device.call_spacing_ms)),
        )
    }

    fn timings_client<S>(&self, store: &S) -> Result<ReqwestTimingsClient, InfraError>
    where
        S: CredentialStore + ?Sized,
    {
        let api_key = resolve_api_key(self.configs.calendar.api_key.as_deref(), store)?;
        ReqwestTimingsClient::new(&self.configs.calendar, api_key, TIMINGS_REQUEST_TIMEOUT)
    }
}

pub async fn run_sync_impl<S, F>(state: &AppState, store: &S, shutdown: F) -> Result<(), InfraError>
where
    S: CredentialStore + ?Sized,
    F: Future<Output = ()>,
{
    let mut service = state.sync_service(store)?;
    service.run(shutdown).await;
    Ok(())
}

pub async fn run_once_impl<S>(state: &AppState, store: &S) -> Result<CycleOutcome, InfraError>
where
    S: CredentialStore + ?Sized,
{
    let mut service = state.sync_service(store)?;
    Ok(service.run_cycle().await)
}

pub async fn run_probe_impl<S, F>(
    state: &AppState,
    store: &S,
    shutdown: F,
) -> Result<(), InfraError>
where
    S: CredentialStore + ?Sized,
    F: Future<Output = ()>,
{
    let mut probe = state.probe(store)?;
    probe.run(shutdown).await;
    Ok(())
}

pub async fn clear_jobs_impl(state: &AppState) -> Result<ReconcileSummary, InfraError> {
    let mut reconciler = state.reconciler()?;
    Ok(reconciler.clear_jobs().await)
}

pub fn set_api_key_impl<S>(store: &S, api_key: &str) -> Result<(), InfraError>
where
    S: CredentialStore + ?Sized,
{
    if api_key.trim().is_empty() {
        return Err(InfraError::Credential("api key must not be empty".to_string()));
    }
    store.save_api_key(api_key)?;
    info!("calendar api key stored");
    Ok(())
}

pub fn forget_api_key_impl<S>(store: &S) -> Result<(), InfraError>
where
    S: CredentialStore + ?Sized,
{
    store.delete_api_key()?;
    info!("calendar api key removed");
    Ok(())
}
