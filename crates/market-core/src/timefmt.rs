//! Timestamp persistence format.
//!
//! Timestamps are stored as RFC 3339 TEXT with fixed microsecond precision
//! and a `Z` suffix, so lexicographic comparison in SQL matches
//! chronological order.

use chrono::{DateTime, SecondsFormat, Utc};

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 3, 14, 30, 5).unwrap()
            + chrono::Duration::microseconds(123456);
        let text = format_ts(ts);
        assert_eq!(parse_ts(&text), Some(ts));
    }

    #[test]
    fn test_lexicographic_order_matches_chronological() {
        let base = Utc.with_ymd_and_hms(2024, 6, 3, 14, 30, 5).unwrap();
        let earlier = format_ts(base);
        let later = format_ts(base + chrono::Duration::microseconds(1));
        let much_later = format_ts(base + chrono::Duration::hours(1));
        assert!(earlier < later);
        assert!(later < much_later);
    }
}
