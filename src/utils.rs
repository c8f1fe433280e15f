use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Parses a bookmark or start date into a UTC datetime.
///
/// Accepts RFC 3339 timestamps (any offset), naive `YYYY-MM-DDTHH:MM:SS` /
/// `YYYY-MM-DD HH:MM:SS` timestamps (taken as UTC) and bare `YYYY-MM-DD` dates
/// (midnight UTC).
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = value.parse::<DateTime<Utc>>() {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::<FixedOffset>::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Formats a bookmark the way records carry their replication key: `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_bookmark(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Every date from `start` through `end`, inclusive. Empty when `start > end`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|day| *day <= end).collect()
}
