//! Timestamp helpers.

use chrono::{DateTime, SecondsFormat, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an RFC 3339 string with second precision.
///
/// # Examples
///
/// ```
/// use bundlekit::utils::now_rfc3339;
///
/// let ts = now_rfc3339();
/// assert!(ts.ends_with('Z'));
/// ```
#[must_use]
pub fn now_rfc3339() -> String {
    format_rfc3339(&Utc::now())
}

/// Formats a timestamp as RFC 3339 with second precision, `Z` suffix.
#[must_use]
pub fn format_rfc3339(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_rfc3339() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(format_rfc3339(&ts), "2024-03-09T07:05:01Z");
    }
}
