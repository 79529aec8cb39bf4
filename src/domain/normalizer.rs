use crate::domain::models::{CanonicalInterval, Interval, RawInterval, parse_timestamp};
use chrono::Duration;
use chrono_tz::Tz;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub pre_shift_minutes: u32,
    pub merge_gap_minutes: u32,
    pub time_zone: Tz,
}

/// Turns raw calendar timings into the canonical schedule: every `on` moved
/// `pre_shift_minutes` earlier, sorted, and neighbours closer than
/// `merge_gap_minutes` folded together.
///
/// Items that cannot be read are dropped with a warning. The shift is applied
/// here only, so canonical output must never be fed back with a non-zero shift.
pub fn normalize(raw: &[RawInterval], options: &NormalizeOptions) -> Vec<CanonicalInterval> {
    let shift = Duration::minutes(i64::from(options.pre_shift_minutes));
    let shifted = raw
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match parse_raw_interval(item, options.time_zone) {
            Ok(interval) => Some(Interval::new(interval.on - shift, interval.off)),
            Err(reason) => {
                warn!(index, on = %item.on, off = %item.off, %reason, "dropping timing");
                None
            }
        })
        .collect();

    merge_intervals(shifted, options.merge_gap_minutes)
}

/// Sorts by `on` (stable, so ties keep input order) and merges every
/// neighbour whose gap is at most `merge_gap_minutes`. Overlaps have a
/// negative gap and always merge.
pub fn merge_intervals(mut intervals: Vec<Interval>, merge_gap_minutes: u32) -> Vec<Interval> {
    intervals.sort_by_key(|interval| interval.on);

    let merge_gap = Duration::minutes(i64::from(merge_gap_minutes));
    let mut merged = Vec::with_capacity(intervals.len());
    let mut iter = intervals.into_iter();
    let Some(mut current) = iter.next() else {
        return merged;
    };

    for next in iter {
        if current.gap_to(&next) <= merge_gap {
            current.off = current.off.max(next.off);
        } else {
            merged.push(current);
            current = next;
        }
    }
    merged.push(current);
    merged
}

fn parse_raw_interval(raw: &RawInterval, time_zone: Tz) -> Result<Interval, String> {
    let on = parse_timestamp(&raw.on, time_zone)?;
    let off = parse_timestamp(&raw.off, time_zone)?;
    if off < on {
        return Err(format!("off {off} is before on {on}"));
    }
    Ok(Interval::new(on, off))
}
