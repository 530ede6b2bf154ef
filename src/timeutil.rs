use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Parse the timestamp formats seen across providers: RFC 3339 (with or
/// without offset), RFC 2822 (RSS `pubDate`) and bare dates.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(v) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(v, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(v, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_provider_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 28, 15, 0, 0).unwrap();
        assert_eq!(parse_datetime("2025-01-28T15:00:00Z"), Some(expected));
        assert_eq!(parse_datetime("2025-01-28T16:00:00+01:00"), Some(expected));
        assert_eq!(
            parse_datetime("Tue, 28 Jan 2025 15:00:00 GMT"),
            Some(expected)
        );
        assert_eq!(parse_datetime("2025-01-28T15:00:00"), Some(expected));
        assert_eq!(
            parse_datetime("2025-01-28"),
            Some(Utc.with_ymd_and_hms(2025, 1, 28, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_datetime("  "), None);
        assert_eq!(parse_datetime("soon"), None);
    }

    #[test]
    fn millis_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();
        assert_eq!(from_millis(to_millis(ts)), ts);
    }
}
