use chrono::{DateTime, NaiveDate, Utc};

/// Day-date format used by the historical price store: `DD-MM-YYYY`.
pub const DAY_DATE_FORMAT: &str = "%d-%m-%Y";

/// Day format used by alert records: `YYYY-MM-DD`.
pub const ALERT_DAY_FORMAT: &str = "%Y-%m-%d";

/// Format a unix timestamp as `DD-MM-YYYY` (UTC).
pub fn day_date(unix: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix, 0)
        .map(|dt| dt.format(DAY_DATE_FORMAT).to_string())
        .unwrap_or_default()
}

/// Today's day-date (`DD-MM-YYYY`, UTC).
pub fn today_day_date() -> String {
    Utc::now().format(DAY_DATE_FORMAT).to_string()
}

/// Format a unix timestamp as an alert day (`YYYY-MM-DD`, UTC).
pub fn alert_day(unix: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix, 0)
        .map(|dt| dt.format(ALERT_DAY_FORMAT).to_string())
        .unwrap_or_default()
}

/// Current unix timestamp (seconds).
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Unix timestamp of today's midnight (UTC).
pub fn midnight_unix() -> i64 {
    Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

/// Parse a historical date parameter: either `YYYY-MM-DD` or a unix epoch.
///
/// `0` is a legal epoch and maps to 1970-01-01.
pub fn parse_date_param(raw: &str) -> Option<i64> {
    if let Ok(unix) = raw.parse::<i64>() {
        return Some(unix);
    }
    NaiveDate::parse_from_str(raw, ALERT_DAY_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

/// Convert an alert day (`YYYY-MM-DD`) back into a day-date (`DD-MM-YYYY`).
pub fn alert_day_to_day_date(alert_day: &str) -> Option<String> {
    NaiveDate::parse_from_str(alert_day, ALERT_DAY_FORMAT)
        .ok()
        .map(|d| d.format(DAY_DATE_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_date_epoch_zero() {
        assert_eq!(day_date(0), "01-01-1970");
    }

    #[test]
    fn test_day_date_known_timestamp() {
        // 2024-07-15 12:00:00 UTC
        assert_eq!(day_date(1_721_044_800), "15-07-2024");
    }

    #[test]
    fn test_parse_date_param_both_forms() {
        assert_eq!(parse_date_param("0"), Some(0));
        assert_eq!(parse_date_param("1721044800"), Some(1_721_044_800));
        assert_eq!(parse_date_param("2024-07-15"), Some(1_721_001_600));
        assert_eq!(parse_date_param("15/07/2024"), None);
    }

    #[test]
    fn test_alert_day_to_day_date() {
        assert_eq!(
            alert_day_to_day_date("2024-07-15"),
            Some("15-07-2024".to_string())
        );
        assert_eq!(alert_day_to_day_date("garbage"), None);
    }
}
