//! Normalization of timestamp-bearing property values.
//!
//! Callers hand over extended ISO strings (`2020-04-30T10:15:00.250Z`) while the
//! database stores the plain form (`20200430T101500,250000`).

use chrono::{DateTime, NaiveDateTime, Timelike};
use log::error;

/// Value used by callers for an unset time.
pub const NOT_A_DATE_TIME: &str = "not-a-date-time";

const EXTENDED_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Reduce an extended ISO timestamp to the plain form.
///
/// Values without a date separator are already plain and returned unchanged.
/// Unparseable values are logged and become empty.
pub fn normalize_timestamp(value: &str) -> String {
    if value.is_empty() || !value.contains('-') {
        return value.to_string();
    }
    if value == NOT_A_DATE_TIME {
        return String::new();
    }
    match parse_extended(value) {
        Some(time) => to_plain(&time),
        None => {
            error!("Invalid time string from session metadata: {}", value);
            String::new()
        }
    }
}

fn parse_extended(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    EXTENDED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

fn to_plain(time: &NaiveDateTime) -> String {
    let base = time.format("%Y%m%dT%H%M%S").to_string();
    let micros = time.nanosecond() / 1_000;
    if micros == 0 {
        base
    } else {
        format!("{},{:06}", base, micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_with_zone_is_reduced() {
        assert_eq!(
            normalize_timestamp("2020-04-30T00:00:00.000Z"),
            "20200430T000000"
        );
        assert_eq!(
            normalize_timestamp("2020-04-30T10:15:00.25+02:00"),
            "20200430T081500,250000"
        );
    }

    #[test]
    fn test_extended_without_zone() {
        assert_eq!(normalize_timestamp("2021-01-02T03:04:05"), "20210102T030405");
        assert_eq!(
            normalize_timestamp("2021-01-02 03:04:05.000123"),
            "20210102T030405,000123"
        );
    }

    #[test]
    fn test_plain_and_sentinel_values() {
        assert_eq!(normalize_timestamp(""), "");
        assert_eq!(normalize_timestamp("20200430T000000"), "20200430T000000");
        assert_eq!(normalize_timestamp(NOT_A_DATE_TIME), "");
    }

    #[test]
    fn test_garbage_degrades_to_empty() {
        assert_eq!(normalize_timestamp("yesterday-ish"), "");
    }
}
