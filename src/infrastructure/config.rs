use crate::domain::models::{SyncPolicy, validate_non_empty};
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const CALENDAR_JSON: &str = "calendar.json";
const SYNC_JSON: &str = "sync.json";
const DEVICE_JSON: &str = "device.json";
const SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub timezone: String,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarConfig {
    pub base_url: String,
    pub house_id: String,
    pub calendar_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub rpc_url: String,
    pub switch_id: u32,
    pub call_spacing_ms: u64,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub app: AppConfig,
    pub calendar: CalendarConfig,
    pub sync: SyncPolicy,
    pub device: DeviceConfig,
    pub time_zone: Tz,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "timezone": "Europe/Helsinki",
                "logLevel": "info"
            }),
        ),
        (
            CALENDAR_JSON,
            serde_json::json!({
                "schema": 1,
                "baseUrl": "https://api.kiinteistodata.fi/open-api-v1/properties",
                "houseId": "",
                "calendarId": "",
                "apiKey": null
            }),
        ),
        (
            SYNC_JSON,
            serde_json::json!({
                "schema": 1,
                "refreshIntervalMs": 300000,
                "weekSpan": 1,
                "mode": "calendar",
                "preShiftMinutes": 30,
                "mergeGapMinutes": 30,
                "nightStartHour": 22,
                "nightEndHour": 10,
                "failedSyncThreshold": 5,
                "escalationWebhookUrl": null
            }),
        ),
        (
            DEVICE_JSON,
            serde_json::json!({
                "schema": 1,
                "rpcUrl": "http://192.168.33.1/rpc",
                "switchId": 0,
                "callSpacingMs": 200,
                "requestTimeoutMs": 10000
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SCHEMA_VERSION {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn read_typed<T>(path: &Path) -> Result<T, InfraError>
where
    T: serde::de::DeserializeOwned,
{
    let value = read_config(path)?;
    serde_json::from_value(value).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {}: {error}", path.display()))
    })
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    let app: AppConfig = read_typed(&config_dir.join(APP_JSON))?;
    let calendar: CalendarConfig = read_typed(&config_dir.join(CALENDAR_JSON))?;
    let sync: SyncPolicy = read_typed(&config_dir.join(SYNC_JSON))?;
    let device: DeviceConfig = read_typed(&config_dir.join(DEVICE_JSON))?;

    let time_zone = parse_time_zone(&app.timezone)?;
    validate_calendar(&calendar).map_err(InfraError::InvalidConfig)?;
    validate_device(&device).map_err(InfraError::InvalidConfig)?;
    sync.validate().map_err(InfraError::InvalidConfig)?;

    Ok(ConfigBundle {
        app,
        calendar,
        sync,
        device,
        time_zone,
    })
}

pub fn parse_time_zone(value: &str) -> Result<Tz, InfraError> {
    value
        .trim()
        .parse::<Tz>()
        .map_err(|error| InfraError::InvalidConfig(format!("unknown timezone '{value}': {error}")))
}

fn validate_calendar(calendar: &CalendarConfig) -> Result<(), String> {
    validate_non_empty(&calendar.base_url, "calendar.base_url")?;
    validate_non_empty(&calendar.house_id, "calendar.house_id")?;
    validate_non_empty(&calendar.calendar_id, "calendar.calendar_id")?;
    if let Some(api_key) = &calendar.api_key {
        validate_non_empty(api_key, "calendar.api_key")?;
    }
    Ok(())
}

fn validate_device(device: &DeviceConfig) -> Result<(), String> {
    validate_non_empty(&device.rpc_url, "device.rpc_url")?;
    if device.request_timeout_ms == 0 {
        return Err("device.request_timeout_ms must be > 0".to_string());
    }
    Ok(())
}
