use crate::domain::models::parse_timestamp;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use std::fmt;
use tracing::warn;

/// Weekly trigger in the device's six-field timespec format:
/// `"<sec> <min> <hour> * * <DOW>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CronSpec {
    pub second: u32,
    pub minute: u32,
    pub hour: u32,
    pub weekday: Weekday,
}

/// Used when an endpoint cannot be read. Sunday 03:00:00 sits inside the
/// default quiet hours, where polling forces the switch off again.
pub const FALLBACK_TRIGGER: CronSpec = CronSpec {
    second: 0,
    minute: 0,
    hour: 3,
    weekday: Weekday::Sun,
};

impl CronSpec {
    pub fn at(timestamp: DateTime<Utc>, time_zone: Tz) -> Self {
        let local = timestamp.with_timezone(&time_zone);
        Self {
            second: local.second(),
            minute: local.minute(),
            hour: local.hour(),
            weekday: local.weekday(),
        }
    }

    pub fn timespec(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CronSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} * * {}",
            self.second,
            self.minute,
            self.hour,
            weekday_code(self.weekday)
        )
    }
}

/// Projects a timestamp string onto its weekly trigger, falling back to
/// [`FALLBACK_TRIGGER`] when the value cannot be read.
pub fn project_timestamp(value: &str, time_zone: Tz) -> CronSpec {
    match parse_timestamp(value, time_zone) {
        Ok(timestamp) => CronSpec::at(timestamp, time_zone),
        Err(reason) => {
            warn!(value, %reason, fallback = %FALLBACK_TRIGGER, "using fallback trigger");
            FALLBACK_TRIGGER
        }
    }
}

fn weekday_code(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Sun => "SUN",
        Weekday::Mon => "MON",
        Weekday::Tue => "TUE",
        Weekday::Wed => "WED",
        Weekday::Thu => "THU",
        Weekday::Fri => "FRI",
        Weekday::Sat => "SAT",
    }
}
