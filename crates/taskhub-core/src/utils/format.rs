use chrono::{DateTime, NaiveDateTime, Utc};

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Format an optional string, returning a default if None
pub fn format_optional(value: &Option<String>, default: &str) -> String {
    value.as_deref().unwrap_or(default).to_string()
}

/// Parse a service timestamp.
/// The task and team services emit both RFC 3339 values and naive
/// `YYYY-MM-DDTHH:MM:SS[.ffffff]` values; naive values are read as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Format a timestamp as "Feb 06, 2026 19:00", falling back to the raw value
pub fn format_timestamp(value: &str) -> String {
    match parse_timestamp(value) {
        Some(dt) => dt.format("%b %d, %Y %H:%M").to_string(),
        None => value.chars().take(16).collect(),
    }
}
