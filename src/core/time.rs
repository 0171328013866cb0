//! Wall-clock time utilities.
//!
//! All record timestamps in Strata are microseconds since the Unix epoch.
//! The keyspace codec encodes them big-endian so that byte-lexicographic
//! iteration over index keys orders entries numerically by time.

use serde::{Deserialize, Serialize};

/// A microsecond-resolution wall-clock timestamp.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Microseconds since the Unix epoch.
    pub micros: u64,
}

impl Timestamp {
    /// Create a timestamp from a microsecond value.
    pub const fn from_micros(micros: u64) -> Self {
        Self { micros }
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let micros = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        Self { micros }
    }

    /// Add a duration, saturating on overflow.
    pub fn add(self, d: std::time::Duration) -> Self {
        Self {
            micros: self.micros.saturating_add(d.as_micros() as u64),
        }
    }

    /// Check if this timestamp is at or before the given instant.
    pub const fn is_expired_at(self, now: Timestamp) -> bool {
        self.micros <= now.micros
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}us", self.micros)
    }
}

impl From<Timestamp> for prost_types::Timestamp {
    fn from(ts: Timestamp) -> Self {
        prost_types::Timestamp {
            seconds: (ts.micros / 1_000_000) as i64,
            nanos: ((ts.micros % 1_000_000) * 1_000) as i32,
        }
    }
}

impl From<&prost_types::Timestamp> for Timestamp {
    fn from(ts: &prost_types::Timestamp) -> Self {
        let micros = ts.seconds.max(0) as u64 * 1_000_000 + (ts.nanos.max(0) as u64 / 1_000);
        Self { micros }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prost_round_trip() {
        let ts = Timestamp::from_micros(1_700_000_000_123_456);
        let wire: prost_types::Timestamp = ts.into();
        assert_eq!(Timestamp::from(&wire), ts);
    }

    #[test]
    fn expiry() {
        let t0 = Timestamp::from_micros(100);
        let t1 = t0.add(std::time::Duration::from_micros(50));
        assert!(t0.is_expired_at(t1));
        assert!(!t1.is_expired_at(t0));
        assert!(t1.is_expired_at(t1));
    }
}
