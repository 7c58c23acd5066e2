use chrono::{DateTime, Datelike, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instant carried as an ISO-8601 string on the wire and compared as a UTC instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Build a timestamp from milliseconds since the Unix epoch.
    ///
    /// Out-of-range values clamp to the epoch.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self(DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH))
    }

    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Absolute distance between two instants.
    #[must_use]
    pub fn abs_diff(&self, other: &Self) -> TimeDelta {
        (self.0 - other.0).abs()
    }

    /// Shifts the instant by a signed number of milliseconds.
    #[must_use]
    pub fn plus_millis(&self, millis: i64) -> Self {
        Self(self.0 + TimeDelta::milliseconds(millis))
    }

    /// Short label used by conversation lists: clock time within the last day,
    /// weekday within the last week, month and day beyond that.
    #[must_use]
    pub fn relative_label(&self, now: &Self) -> String {
        let age = now.0 - self.0;
        if age < TimeDelta::days(1) {
            self.0.format("%H:%M").to_string()
        } else if age < TimeDelta::days(7) {
            self.0.format("%a").to_string()
        } else {
            format!("{} {}", self.0.format("%b"), self.0.day())
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}
