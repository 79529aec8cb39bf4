use crate::domain::models::{MAX_WEEK_SPAN, SyncMode};
use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl FetchWindow {
    pub fn start_label(&self) -> String {
        self.start_date.format("%Y-%m-%d").to_string()
    }

    pub fn end_label(&self) -> String {
        self.end_date.format("%Y-%m-%d").to_string()
    }
}

/// Computes the dates requested from the calendar. Both modes cover
/// `7 * week_span` local days; `Calendar` starts on the Monday of the current
/// week, `Rolling` starts today. `week_span` is clamped to `1..=MAX_WEEK_SPAN`.
pub fn compute_window(
    now: DateTime<Utc>,
    time_zone: Tz,
    week_span: u32,
    mode: SyncMode,
) -> FetchWindow {
    let today = now.with_timezone(&time_zone).date_naive();
    let start_date = match mode {
        SyncMode::Calendar => {
            let since_monday = u64::from(today.weekday().num_days_from_monday());
            today.checked_sub_days(Days::new(since_monday)).unwrap_or(today)
        }
        SyncMode::Rolling => today,
    };
    let span_days = u64::from(week_span.clamp(1, MAX_WEEK_SPAN)) * 7 - 1;
    let end_date = start_date
        .checked_add_days(Days::new(span_days))
        .unwrap_or(NaiveDate::MAX);

    FetchWindow {
        start_date,
        end_date,
        start: local_datetime(time_zone, start_date, NaiveTime::default()),
        end: local_datetime(time_zone, end_date, end_of_day()),
    }
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default()
}

// A wall time skipped by a DST jump is read as UTC so the window stays defined.
fn local_datetime(time_zone: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
    let naive = date.and_time(time);
    time_zone
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| time_zone.from_utc_datetime(&naive))
}
