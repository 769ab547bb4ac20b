//! Time types and timestamp normalization.
//!
//! Providers report times in several shapes: RFC 3339 with an offset,
//! naive datetimes paired with a separate timezone name, date-only values
//! for all-day events, and RFC 2822 mail headers. Everything is normalized
//! to one representation, UTC with an explicit `+00:00` offset and whole
//! seconds, so that ordering by plain string comparison is chronological.

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};

/// Naive datetime layouts seen in provider payloads (Graph uses 7 fractional digits).
const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Formats a UTC instant in the canonical form, e.g. `2025-02-05T10:00:00+00:00`.
pub fn canonical_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Formats an all-day date as midnight UTC in the canonical form.
pub fn normalize_date(date: NaiveDate) -> String {
    canonical_timestamp(date.and_time(chrono::NaiveTime::MIN).and_utc())
}

/// Parses any supported timestamp shape into a UTC instant.
///
/// Naive datetimes are read as UTC; date-only values map to midnight UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Some(naive) = parse_naive(raw) {
        return Some(naive.and_utc());
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }

    DateTime::parse_from_rfc2822(strip_mail_zone_comment(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Normalizes a timestamp string to the canonical form.
///
/// Returns `None` if the value is empty or cannot be parsed.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    parse_timestamp(raw).map(canonical_timestamp)
}

/// Normalizes a naive datetime that the provider qualifies with a timezone name.
///
/// The zone may be `UTC`, an IANA identifier, or absent. Values that already
/// carry an offset ignore the zone. Unknown zone names are treated as UTC.
pub fn normalize_timestamp_in_zone(raw: &str, zone: Option<&str>) -> Option<String> {
    let trimmed = raw.trim();
    if DateTime::parse_from_rfc3339(trimmed).is_ok() {
        return normalize_timestamp(trimmed);
    }

    let Some(naive) = parse_naive(trimmed) else {
        return normalize_timestamp(trimmed);
    };

    let zone = zone.map(str::trim).unwrap_or("UTC");
    if is_utc_name(zone) {
        return Some(canonical_timestamp(naive.and_utc()));
    }

    match zone.parse::<chrono_tz::Tz>() {
        Ok(tz) => tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| canonical_timestamp(dt.with_timezone(&Utc))),
        Err(_) => {
            tracing::debug!(zone, "unrecognized timezone name, reading time as UTC");
            Some(canonical_timestamp(naive.and_utc()))
        }
    }
}

fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

fn is_utc_name(zone: &str) -> bool {
    zone.is_empty()
        || zone.eq_ignore_ascii_case("utc")
        || zone.eq_ignore_ascii_case("etc/utc")
        || zone.eq_ignore_ascii_case("gmt")
}

/// Mail `Date` headers often end in a comment such as `(UTC)` or `(PST)`.
fn strip_mail_zone_comment(raw: &str) -> &str {
    match raw.rfind(" (") {
        Some(idx) if raw.ends_with(')') => raw[..idx].trim_end(),
        _ => raw,
    }
}

/// A time window for querying events.
///
/// Represents a half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a new time window, or `None` if `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Creates a time window from a start time and duration.
    pub fn from_duration(start: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            start,
            end: start + duration,
        }
    }

    /// The seven days starting at the most recent Monday 00:00 UTC.
    pub fn current_week(now: DateTime<Utc>) -> Self {
        let days_since_monday = i64::from(now.weekday().num_days_from_monday());
        let monday = now.date_naive() - Duration::days(days_since_monday);
        let start = monday.and_time(chrono::NaiveTime::MIN).and_utc();
        Self::from_duration(start, Duration::days(7))
    }

    /// Builds a window from optional caller-supplied bounds.
    ///
    /// A missing start defaults to the current week's Monday; a missing end
    /// defaults to seven days after the start. Returns `None` if a supplied
    /// bound cannot be parsed or the bounds are inverted.
    pub fn from_bounds(start: Option<&str>, end: Option<&str>, now: DateTime<Utc>) -> Option<Self> {
        let start = match start {
            Some(raw) => parse_timestamp(raw)?,
            None => Self::current_week(now).start,
        };
        let end = match end {
            Some(raw) => parse_timestamp(raw)?,
            None => start + Duration::days(7),
        };
        Self::new(start, end)
    }

    /// Returns the duration of this time window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Checks if a datetime falls within this window.
    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        self.start <= dt && dt < self.end
    }

    /// Returns the start in canonical string form.
    pub fn start_string(&self) -> String {
        canonical_timestamp(self.start)
    }

    /// Returns the end in canonical string form.
    pub fn end_string(&self) -> String {
        canonical_timestamp(self.end)
    }
}
