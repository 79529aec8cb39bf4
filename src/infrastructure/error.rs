use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Calendar fetch error: {0}")]
    Fetch(String),
    #[error("Remote job error: {0}")]
    RemoteJob(String),
    #[error("Switch error: {0}")]
    Switch(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("Notification error: {0}")]
    Notify(String),
}

impl InfraError {
    pub fn is_transient(&self) -> bool {
        matches!(self, InfraError::Network(_))
    }
}
