use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Escalation {
    pub consecutive_failures: u32,
    pub last_error: String,
    pub at: DateTime<Utc>,
}

/// Told once every time the calendar has failed `failed_sync_threshold` times in a row.
#[async_trait]
pub trait EscalationNotifier: Send + Sync {
    async fn notify(&self, escalation: &Escalation) -> Result<(), InfraError>;
}

#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl EscalationNotifier for LogNotifier {
    async fn notify(&self, escalation: &Escalation) -> Result<(), InfraError> {
        error!(
            failures = escalation.consecutive_failures,
            last_error = %escalation.last_error,
            "calendar sync keeps failing"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl EscalationNotifier for WebhookNotifier {
    async fn notify(&self, escalation: &Escalation) -> Result<(), InfraError> {
        LogNotifier.notify(escalation).await?;

        let response = self
            .client
            .post(&self.url)
            .json(escalation)
            .send()
            .await
            .map_err(|error| InfraError::Notify(format!("webhook request failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InfraError::Notify(format!(
                "webhook rejected escalation: http {}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}
