use crate::domain::models::RawInterval;
use crate::domain::window::FetchWindow;
use crate::infrastructure::config::CalendarConfig;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

#[async_trait]
pub trait TimingsClient: Send + Sync {
    async fn fetch_timings(&self, window: &FetchWindow) -> Result<Vec<RawInterval>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTimingsClient {
    client: Client,
    base_url: String,
    house_id: String,
    calendar_id: String,
    api_key: String,
}

#[derive(Debug, serde::Deserialize)]
struct TimingsResponse {
    timings: Option<Vec<RawInterval>>,
}

impl ReqwestTimingsClient {
    pub fn new(
        calendar: &CalendarConfig,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                InfraError::InvalidConfig(format!("cannot build http client: {error}"))
            })?;
        Ok(Self {
            client,
            base_url: calendar.base_url.trim().to_string(),
            house_id: calendar.house_id.trim().to_string(),
            calendar_id: calendar.calendar_id.trim().to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn timings_url(&self, window: &FetchWindow) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|error| {
                InfraError::InvalidConfig(format!("invalid calendar base url: {error}"))
            })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("calendar base URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push(&self.house_id);
            segments.push("calendars");
            segments.push(&self.calendar_id);
            segments.push("timings");
            segments.push(&window.start_label());
            segments.push(&window.end_label());
            segments.push("");
        }
        url.query_pairs_mut().append_pair("api_key", &self.api_key);
        Ok(url)
    }

    fn http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("timings api error: http {}", status.as_u16())
        } else {
            format!("timings api error: http {}; body={body}", status.as_u16())
        };
        if status.is_server_error() {
            InfraError::Network(message)
        } else {
            InfraError::Fetch(message)
        }
    }
}

pub fn parse_timings_body(body: &str) -> Result<Vec<RawInterval>, InfraError> {
    let parsed: TimingsResponse = serde_json::from_str(body)
        .map_err(|error| {
            InfraError::Fetch(format!("invalid timings payload: {error}; body={body}"))
        })?;
    Ok(parsed.timings.unwrap_or_default())
}

#[async_trait]
impl TimingsClient for ReqwestTimingsClient {
    async fn fetch_timings(&self, window: &FetchWindow) -> Result<Vec<RawInterval>, InfraError> {
        let endpoint = self.timings_url(window)?;

        let response = self
            .client
            .get(endpoint)
            .send()
            .await
            .map_err(|error| {
                InfraError::Network(format!("network error while fetching timings: {error}"))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| {
                InfraError::Network(format!("failed reading timings response: {error}"))
            })?;

        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }
        parse_timings_body(&body)
    }
}
