//! Time bucket keys
//!
//! Counters are grouped under three string keys derived from the event time:
//!
//! | bucket | format        | example      |
//! |--------|---------------|--------------|
//! | day    | `YYYY-MM-DD`  | `2026-10-17` |
//! | week   | `YYYY-Www`    | `2026-W42`   |
//! | month  | `YYYY-MM`     | `2026-10`    |
//!
//! The week number is NOT ISO-8601. It is
//!
//! ```text
//! week = ceil((days_since_jan1 + weekday(jan1) + 1) / 7)
//! ```
//!
//! where `days_since_jan1` is fractional (time of day counts, millisecond
//! precision) and `weekday` counts from Sunday = 0. Existing stored data is keyed
//! with this formula, so it is reproduced exactly, quirks included: a Saturday
//! can straddle two weeks depending on the hour, and Dec 31 can land in week 53
//! or 54. All keys are computed in UTC.

use chrono::{DateTime, Datelike, Timelike, Utc};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// The three bucket keys for one instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketKeys {
    pub day: String,
    pub week: String,
    pub month: String,
}

impl BucketKeys {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            day: date_key(now),
            week: week_key(now),
            month: month_key(now),
        }
    }
}

/// `YYYY-MM-DD`
pub fn date_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// `YYYY-MM`
pub fn month_key(now: DateTime<Utc>) -> String {
    format!("{}-{:02}", now.year(), now.month())
}

/// `YYYY-Www` using [`week_number`]
pub fn week_key(now: DateTime<Utc>) -> String {
    format!("{}-W{:02}", now.year(), week_number(now))
}

/// Week-of-year under the legacy formula (see module docs)
pub fn week_number(now: DateTime<Utc>) -> u32 {
    let day_index = i64::from(now.ordinal0());
    let millis_into_day = i64::from(now.num_seconds_from_midnight()) * 1000
        + i64::from(now.timestamp_subsec_millis().min(999));
    let elapsed_days = (day_index * MILLIS_PER_DAY + millis_into_day) as f64 / MILLIS_PER_DAY as f64;

    // Weekday of Jan 1, walking back from today's weekday
    let today = i64::from(now.weekday().num_days_from_sunday());
    let jan1_weekday = (today - day_index % 7).rem_euclid(7) as f64;

    ((elapsed_days + jan1_weekday + 1.0) / 7.0).ceil() as u32
}
