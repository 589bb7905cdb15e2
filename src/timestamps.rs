use chrono::{DateTime, NaiveDate, SecondsFormat, TimeDelta, Utc};

use crate::error::{AppError, AppResult};

/// Stored form of every timestamp: UTC, millisecond precision, `Z` suffix.
/// Strings in this form sort chronologically.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Accepts RFC 3339 or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn normalize_timestamp(value: &str, field: &str) -> AppResult<String> {
    let trimmed = value.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(format_timestamp(parsed.with_timezone(&Utc)));
    }

    if let Some(midnight) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(format_timestamp(midnight.and_utc()));
    }

    Err(AppError::BadRequest(format!(
        "{field} must be an RFC 3339 timestamp or YYYY-MM-DD date"
    )))
}

pub fn normalize_optional_timestamp(value: Option<&str>, field: &str) -> AppResult<Option<String>> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| normalize_timestamp(value, field))
        .transpose()
}

/// Like [`normalize_timestamp`], but a bare date means the last millisecond
/// of that day so it works as an inclusive upper bound.
pub fn normalize_end_bound(value: &str, field: &str) -> AppResult<String> {
    match NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_milli_opt(23, 59, 59, 999))
    {
        Some(end_of_day) => Ok(format_timestamp(end_of_day.and_utc())),
        None => normalize_timestamp(value, field),
    }
}

/// `days` before now, or `None` when that falls outside the representable range.
pub fn days_ago(days: i64) -> Option<String> {
    TimeDelta::try_days(days)
        .and_then(|delta| Utc::now().checked_sub_signed(delta))
        .map(format_timestamp)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
