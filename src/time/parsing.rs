//! Utility functions for parsing time/date strings into chrono types.

use super::error::TimeError;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

/// Parses a naive datetime string as found in EXIF (YYYY:MM:DD HH:MM:SS[.fff]).
pub fn parse_exif_naive(s: &str) -> Option<NaiveDateTime> {
    let formats = [
        "%Y:%m:%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y:%m:%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];

    formats
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s.trim(), fmt).ok())
}

/// Parses a datetime string carrying an offset (RFC 3339 or EXIF style).
pub fn parse_datetime_offset(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .or_else(|| DateTime::parse_from_str(s, "%Y:%m:%d %H:%M:%S%z").ok())
        .or_else(|| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%z").ok())
}

/// Converts a `YYYY-MM-DD` date into the UTC timestamp string the Mapillary
/// API expects for `start_captured_at`/`end_captured_at`.
///
/// With `end_of_day` the time is set to 23:59:59, otherwise midnight.
pub fn date_to_timestamp(date: &str, end_of_day: bool) -> Result<String, TimeError> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| TimeError::MalformedDate(date.to_string()))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| TimeError::MalformedDate(date.to_string()))?;
    Ok(day.and_time(time).format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_exif_naive_formats() {
        let dt = parse_exif_naive("2023:07:14 18:30:05").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2023, 7, 14));
        assert_eq!((dt.hour(), dt.minute(), dt.second()), (18, 30, 5));

        let with_subsec = parse_exif_naive("2023:07:14 18:30:05.250").unwrap();
        assert_eq!(with_subsec.nanosecond(), 250_000_000);

        assert!(parse_exif_naive("2023-07-14 18:30:05").is_some());
        assert!(parse_exif_naive("not a date").is_none());
        assert!(parse_exif_naive("").is_none());
    }

    #[test]
    fn test_date_to_timestamp() {
        assert_eq!(
            date_to_timestamp("2021-09-01", false).unwrap(),
            "2021-09-01T00:00:00Z"
        );
        assert_eq!(
            date_to_timestamp("2021-09-01", true).unwrap(),
            "2021-09-01T23:59:59Z"
        );
    }

    #[test]
    fn test_date_to_timestamp_rejects_garbage() {
        assert_eq!(
            date_to_timestamp("01/09/2021", false),
            Err(TimeError::MalformedDate("01/09/2021".to_string()))
        );
        assert!(date_to_timestamp("2021-13-01", false).is_err());
    }

    #[test]
    fn test_parse_datetime_offset() {
        let dt = parse_datetime_offset("2021-09-01T09:55:03-07:00").unwrap();
        assert_eq!(dt.offset().local_minus_utc(), -7 * 3600);
        assert!(parse_datetime_offset("2021:09:01 09:55:03+0200").is_some());
        assert!(parse_datetime_offset("yesterday").is_none());
    }
}
