use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const SECONDS_PER_DAY: i64 = 60 * 60 * 24;

/// Last-modified time of an entity, in whole seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Earlier than every real timestamp.
    pub const MIN: Timestamp = Timestamp(i64::MIN);
    /// Later than every real timestamp; a cutoff of `MAX` accepts everything.
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    #[inline]
    pub const fn as_secs(self) -> i64 {
        self.0
    }

    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    /// The cutoff `days` days before `now`.
    pub fn days_before(now: Timestamp, days: u32) -> Self {
        Self(now.0.saturating_sub(i64::from(days) * SECONDS_PER_DAY))
    }

    /// Parses `yyyy-mm-ddThh:mm:ssZ` (any RFC 3339 offset is accepted).
    pub fn from_iso(text: &str) -> Result<Self, chrono::ParseError> {
        let parsed = DateTime::parse_from_rfc3339(text.trim())?;
        Ok(Self(parsed.timestamp()))
    }

    /// Formats as `yyyy-mm-ddThh:mm:ssZ`. Sentinels outside chrono's range
    /// format as an empty string.
    pub fn to_iso(self) -> String {
        DateTime::<Utc>::from_timestamp(self.0, 0)
            .map(|dt| dt.format(ISO_FORMAT).to_string())
            .unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_round_trip() {
        let ts = Timestamp::from_iso("2017-03-04T05:06:07Z").unwrap();
        assert_eq!(ts.as_secs(), 1_488_603_967);
        assert_eq!(ts.to_iso(), "2017-03-04T05:06:07Z");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Timestamp::from_iso("yesterday").is_err());
    }

    #[test]
    fn days_before_counts_whole_days() {
        let now = Timestamp::from_secs(10 * SECONDS_PER_DAY);
        assert_eq!(Timestamp::days_before(now, 3).as_secs(), 7 * SECONDS_PER_DAY);
        assert!(Timestamp::MIN < Timestamp::from_secs(0));
        assert_eq!(Timestamp::MAX.to_iso(), "");
    }
}
