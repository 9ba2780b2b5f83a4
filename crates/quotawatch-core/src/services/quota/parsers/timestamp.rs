//! Timestamps that arrive as numbers or strings
//!
//! APIs disagree on how reset times are encoded: epoch seconds, epoch
//! milliseconds, the same as strings, or ISO-8601. `FlexibleTimestamp` accepts
//! all of them.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;

/// Epoch values above this are milliseconds
const MILLIS_THRESHOLD: f64 = 1e12;

/// A timestamp decoded from either a JSON number or a JSON string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FlexibleTimestamp {
    Epoch(f64),
    Text(String),
}

impl FlexibleTimestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            FlexibleTimestamp::Epoch(value) => from_epoch(*value),
            FlexibleTimestamp::Text(text) => parse_timestamp_str(text),
        }
    }
}

/// Convert epoch seconds or milliseconds
pub fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = if value > MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    Utc.timestamp_millis_opt(millis as i64).single()
}

/// Parse a timestamp string
///
/// Tried in order: epoch number, RFC 3339, naive date-time (UTC), plain
/// date, and finally the leading digits as an epoch.
pub fn parse_timestamp_str(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = trimmed.parse::<f64>() {
        return from_epoch(value);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive));
    }

    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<f64>().ok().and_then(from_epoch)
}
