//! Slot arithmetic on the aligned timeline

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

/// Truncate `t` to the start of its slot. A non-positive step leaves `t` as is.
pub fn round(t: DateTime<Utc>, step: Duration) -> DateTime<Utc> {
    let unit = step.num_seconds();
    if unit <= 0 {
        return t;
    }
    let secs = t.timestamp();
    let start = secs - secs.rem_euclid(unit);
    DateTime::from_timestamp(start, 0).unwrap_or(t)
}

/// A sorted run `timeline[start..=end]` is gapless iff its span equals
/// `(end - start) * step`, i.e. no slot is missing inside it.
pub fn is_gapless(timeline: &[DateTime<Utc>], start: usize, end: usize, step: Duration) -> bool {
    if start > end || end >= timeline.len() {
        return false;
    }
    if start == end {
        return true;
    }
    timeline[end] - timeline[start] == step * (end - start) as i32
}

/// Fraction of the year elapsed, day-of-year / 366
pub fn year_fraction(t: DateTime<Utc>) -> f64 {
    t.ordinal() as f64 / 366.0
}

/// Fraction of the day elapsed since UTC midnight
pub fn day_fraction(t: DateTime<Utc>) -> f64 {
    let secs = t.num_seconds_from_midnight() as f64 + t.nanosecond() as f64 / 1e9;
    secs / 86_400.0
}

/// UTC midnight of the day containing `t`
pub fn start_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    round(t, Duration::days(1))
}
