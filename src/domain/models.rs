use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_WEEK_SPAN: u32 = 52;

/// One ON/OFF pair exactly as the calendar returned it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RawInterval {
    #[serde(default)]
    pub on: String,
    #[serde(default)]
    pub off: String,
}

impl RawInterval {
    pub fn new(on: impl Into<String>, off: impl Into<String>) -> Self {
        Self {
            on: on.into(),
            off: off.into(),
        }
    }
}

/// Half-open `[on, off)` span during which the switch should be energized.
///
/// Ordering is by `on`, then `off`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    pub on: DateTime<Utc>,
    pub off: DateTime<Utc>,
}

/// An interval that has been shifted and merged by the normalizer.
pub type CanonicalInterval = Interval;

impl Interval {
    pub fn new(on: DateTime<Utc>, off: DateTime<Utc>) -> Self {
        Self { on, off }
    }

    pub fn duration(&self) -> Duration {
        self.off - self.on
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.on < other.off && other.on < self.off
    }

    /// Signed distance from the end of `self` to the start of `next`.
    pub fn gap_to(&self, next: &Interval) -> Duration {
        next.on - self.off
    }

    pub fn to_raw(&self) -> RawInterval {
        RawInterval {
            on: self.on.to_rfc3339_opts(SecondsFormat::Millis, true),
            off: self.off.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SwitchCommand {
    On,
    Off,
}

impl SwitchCommand {
    pub fn is_on(self) -> bool {
        matches!(self, SwitchCommand::On)
    }

    pub fn from_on(on: bool) -> Self {
        if on { SwitchCommand::On } else { SwitchCommand::Off }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SwitchCommand::On => "ON",
            SwitchCommand::Off => "OFF",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job as listed from the device scheduler.
///
/// Jobs created by other tools are listed too, so the timespec is kept verbatim
/// and the action is only known when it is a plain switch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJob {
    pub id: JobId,
    pub timespec: String,
    pub action: Option<SwitchCommand>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Monday of the current week through the end of the last spanned week.
    #[default]
    Calendar,
    /// Today through `7 * week_span - 1` days later.
    Rolling,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuietHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl QuietHours {
    pub fn validate(&self) -> Result<(), String> {
        validate_hour(self.start_hour, "sync.night_start_hour")?;
        validate_hour(self.end_hour, "sync.night_end_hour")?;
        if self.start_hour <= self.end_hour {
            return Err(
                "sync.night_start_hour must be later than sync.night_end_hour".to_string(),
            );
        }
        Ok(())
    }

    /// The window always wraps midnight: `[start_hour, 24) ∪ [0, end_hour)`.
    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.start_hour || hour < self.end_hour
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    pub refresh_interval_ms: u64,
    pub week_span: u32,
    pub mode: SyncMode,
    pub pre_shift_minutes: u32,
    pub merge_gap_minutes: u32,
    pub night_start_hour: u32,
    pub night_end_hour: u32,
    pub failed_sync_threshold: u32,
    #[serde(default)]
    pub escalation_webhook_url: Option<String>,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 5 * 60 * 1000,
            week_span: 1,
            mode: SyncMode::Calendar,
            pre_shift_minutes: 30,
            merge_gap_minutes: 30,
            night_start_hour: 22,
            night_end_hour: 10,
            failed_sync_threshold: 5,
            escalation_webhook_url: None,
        }
    }
}

impl SyncPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.refresh_interval_ms == 0 {
            return Err("sync.refresh_interval_ms must be > 0".to_string());
        }
        if self.week_span == 0 || self.week_span > MAX_WEEK_SPAN {
            return Err(format!("sync.week_span must be within 1..={MAX_WEEK_SPAN}"));
        }
        if self.failed_sync_threshold == 0 {
            return Err("sync.failed_sync_threshold must be > 0".to_string());
        }
        if let Some(url) = &self.escalation_webhook_url {
            validate_non_empty(url, "sync.escalation_webhook_url")?;
        }
        self.quiet_hours().validate()
    }

    pub fn quiet_hours(&self) -> QuietHours {
        QuietHours {
            start_hour: self.night_start_hour,
            end_hour: self.night_end_hour,
        }
    }
}

/// Reads an ISO-8601 timestamp. Values without an offset are local wall time
/// in `time_zone`.
pub fn parse_timestamp(value: &str, time_zone: Tz) -> Result<DateTime<Utc>, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("timestamp is empty".to_string());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M"))
        .map_err(|error| format!("invalid timestamp '{trimmed}': {error}"))?;
    time_zone
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| format!("timestamp '{trimmed}' does not exist in {time_zone}"))
}

pub fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_hour(value: u32, field_name: &str) -> Result<(), String> {
    if value > 23 {
        return Err(format!("{field_name} must be within 0..=23"));
    }
    Ok(())
}
