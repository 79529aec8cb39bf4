use crate::domain::cron::CronSpec;
use crate::domain::models::{JobId, RemoteJob, SwitchCommand};
use crate::infrastructure::config::DeviceConfig;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

const SWITCH_SET_METHOD: &str = "Switch.Set";

/// The device's own persistent scheduler.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn list_jobs(&self) -> Result<Vec<RemoteJob>, InfraError>;

    async fn delete_job(&self, id: JobId) -> Result<(), InfraError>;

    async fn create_job(
        &self,
        trigger: &CronSpec,
        action: SwitchCommand,
    ) -> Result<JobId, InfraError>;
}

#[async_trait]
pub trait SwitchActuator: Send + Sync {
    async fn set_switch(&self, command: SwitchCommand) -> Result<(), InfraError>;
}

/// JSON-RPC over HTTP client for the relay device.
#[derive(Debug)]
pub struct ReqwestDeviceRpcClient {
    client: Client,
    rpc_url: Url,
    switch_id: u32,
    next_request_id: AtomicU64,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleCall {
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct CreateJobParams {
    enable: bool,
    timespec: String,
    calls: Vec<ScheduleCall>,
}

#[derive(Debug, Serialize)]
struct DeleteJobParams {
    id: u64,
}

#[derive(Debug, Serialize)]
struct SwitchSetParams {
    id: u32,
    on: bool,
}

#[derive(Debug, Deserialize)]
struct ListJobsResult {
    #[serde(default)]
    jobs: Vec<ListedJob>,
}

#[derive(Debug, Deserialize)]
struct ListedJob {
    id: u64,
    #[serde(default)]
    timespec: String,
    #[serde(default)]
    calls: Vec<ScheduleCall>,
}

#[derive(Debug, Deserialize)]
struct CreateJobResult {
    id: u64,
}

impl ReqwestDeviceRpcClient {
    pub fn new(device: &DeviceConfig) -> Result<Self, InfraError> {
        let rpc_url = Url::parse(device.rpc_url.trim())
            .map_err(|error| {
                InfraError::InvalidConfig(format!("invalid device rpc url: {error}"))
            })?;
        let client = Client::builder()
            .timeout(Duration::from_millis(device.request_timeout_ms))
            .build()
            .map_err(|error| {
                InfraError::InvalidConfig(format!("cannot build http client: {error}"))
            })?;
        Ok(Self {
            client,
            rpc_url,
            switch_id: device.switch_id,
            next_request_id: AtomicU64::new(1),
        })
    }

    async fn call<P, R>(
        &self,
        method: &str,
        params: P,
        to_error: fn(String) -> InfraError,
    ) -> Result<R, InfraError>
    where
        P: Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        let request = RpcRequest {
            id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .client
            .post(self.rpc_url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|error| to_error(format!("{method} request failed: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| to_error(format!("failed reading {method} response: {error}")))?;

        if !status.is_success() {
            return Err(to_error(format!("{method} failed: http {}; body={body}", status.as_u16())));
        }
        decode_rpc_result(method, &body).map_err(to_error)
    }
}

fn decode_rpc_result<R>(method: &str, body: &str) -> Result<R, String>
where
    R: DeserializeOwned,
{
    let parsed: RpcResponse<R> = serde_json::from_str(body)
        .map_err(|error| format!("invalid {method} payload: {error}; body={body}"))?;
    if let Some(error) = parsed.error {
        return Err(format!("{method} rejected: code {} {}", error.code, error.message));
    }
    parsed
        .result
        .ok_or_else(|| format!("{method} response did not include a result"))
}

pub fn switch_call(switch_id: u32, command: SwitchCommand) -> ScheduleCall {
    ScheduleCall {
        method: SWITCH_SET_METHOD.to_string(),
        params: serde_json::json!({ "id": switch_id, "on": command.is_on() }),
    }
}

fn decode_action(calls: &[ScheduleCall]) -> Option<SwitchCommand> {
    let [call] = calls else {
        return None;
    };
    if !call.method.eq_ignore_ascii_case(SWITCH_SET_METHOD) {
        return None;
    }
    call.params
        .get("on")
        .and_then(serde_json::Value::as_bool)
        .map(SwitchCommand::from_on)
}

fn decode_job(job: ListedJob) -> RemoteJob {
    RemoteJob {
        id: JobId(job.id),
        action: decode_action(&job.calls),
        timespec: job.timespec,
    }
}

#[async_trait]
impl ScheduleStore for ReqwestDeviceRpcClient {
    async fn list_jobs(&self) -> Result<Vec<RemoteJob>, InfraError> {
        let result: ListJobsResult = self
            .call("Schedule.List", serde_json::json!({}), InfraError::RemoteJob)
            .await?;
        Ok(result.jobs.into_iter().map(decode_job).collect())
    }

    async fn delete_job(&self, id: JobId) -> Result<(), InfraError> {
        let _: serde_json::Value = self
            .call("Schedule.Delete", DeleteJobParams { id: id.0 }, InfraError::RemoteJob)
            .await?;
        Ok(())
    }

    async fn create_job(
        &self,
        trigger: &CronSpec,
        action: SwitchCommand,
    ) -> Result<JobId, InfraError> {
        let params = CreateJobParams {
            enable: true,
            timespec: trigger.timespec(),
            calls: vec![switch_call(self.switch_id, action)],
        };
        let result: CreateJobResult = self
            .call("Schedule.Create", params, InfraError::RemoteJob)
            .await?;
        Ok(JobId(result.id))
    }
}

#[async_trait]
impl SwitchActuator for ReqwestDeviceRpcClient {
    async fn set_switch(&self, command: SwitchCommand) -> Result<(), InfraError> {
        let params = SwitchSetParams {
            id: self.switch_id,
            on: command.is_on(),
        };
        let _: serde_json::Value = self.call(SWITCH_SET_METHOD, params, InfraError::Switch).await?;
        Ok(())
    }
}
