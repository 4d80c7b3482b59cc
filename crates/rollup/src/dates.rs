//! Temporal derivations shared by issue and epic normalization.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Parse an upstream timestamp.
///
/// Accepts RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.f]` (read as UTC) and plain
/// `YYYY-MM-DD` (midnight UTC). Anything else yields `None`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// The date part of an upstream date/timestamp string (`2024-03-01T...` -> `2024-03-01`).
pub fn date_only(raw: &str) -> String {
    raw.split('T').next().unwrap_or_default().to_string()
}

/// Month/year breakdown of a timestamp
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateParts {
    pub month_name: String,
    pub month_number: String,
    pub year: String,
    /// `1:<Month>` when the date falls before the current month, else `0:<Month>`
    pub threshold: String,
}

impl DateParts {
    pub fn of(date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let Some(date) = date else {
            return Self::default();
        };
        let month_name = MONTH_NAMES[date.month0() as usize].to_string();
        let before_current_month =
            (date.year(), date.month()) < (now.year(), now.month());
        let threshold = format!("{}:{}", if before_current_month { 1 } else { 0 }, month_name);
        Self {
            month_number: date.month().to_string(),
            year: date.year().to_string(),
            month_name,
            threshold,
        }
    }
}

/// Whole days between two instants, rounded up, regardless of order.
pub fn diff_in_days(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    let seconds = (a - b).num_seconds().abs();
    (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
}

/// A sprint window parsed from a milestone title like `3.4 - 3.17`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SprintWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

static SPRINT_REGEX: OnceLock<Regex> = OnceLock::new();

fn sprint_regex() -> &'static Regex {
    SPRINT_REGEX.get_or_init(|| {
        Regex::new(r"(\d{1,2})\.(\d{1,2})\s*-\s*(\d{1,2})\.(\d{1,2})")
            .expect("Sprint regex should compile")
    })
}

impl SprintWindow {
    /// Parse `M.D - M.D` out of a milestone title, dated in `year`.
    ///
    /// Returns `None` when the title has no window or names an impossible date.
    pub fn parse(title: &str, year: i32) -> Option<Self> {
        let caps = sprint_regex().captures(title)?;
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let start = NaiveDate::from_ymd_opt(year, num(1)?, num(2)?)?;
        let end = NaiveDate::from_ymd_opt(year, num(3)?, num(4)?)?;
        Some(Self { start, end })
    }

    /// Days left until the end date (midnight UTC), rounded up; 0 once passed.
    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        let Some(end) = self.end.and_hms_opt(0, 0, 0) else {
            return 0;
        };
        let end = Utc.from_utc_datetime(&end);
        if now < end {
            diff_in_days(end, now)
        } else {
            0
        }
    }
}
