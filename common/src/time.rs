//! Time utilities and timing constants.

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Engine timing constants.
pub mod constants {
    use super::Duration;

    /// Quiet period after the last mutation before a batch is reconciled (300 milliseconds).
    pub fn debounce_window() -> Duration {
        Duration::milliseconds(300)
    }

    /// Delay between a settled pass and the percentage annotation (500 milliseconds).
    pub fn settle_delay() -> Duration {
        Duration::milliseconds(500)
    }

    /// Delay before the first full-document pass (1 second).
    pub fn initial_delay() -> Duration {
        Duration::seconds(1)
    }

    /// Interval of the periodic rate refresh (1 hour).
    pub fn refresh_interval() -> Duration {
        Duration::hours(1)
    }

    /// Lifetime of a persisted rate (24 hours).
    pub fn rate_ttl() -> Duration {
        Duration::hours(24)
    }
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Milliseconds since the Unix epoch, as persisted in the rate store.
pub fn to_millis(timestamp: Timestamp) -> i64 {
    timestamp.timestamp_millis()
}

/// Inverse of [`to_millis`]; `None` for values chrono cannot represent.
pub fn from_millis(millis: i64) -> Option<Timestamp> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Duration extensions for convenient construction.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        now()
    }
}

/// Manually advanced clock for tests.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug)]
pub struct ManualClock {
    current: parking_lot::Mutex<Timestamp>,
}

#[cfg(any(test, feature = "test-utils"))]
impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: parking_lot::Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.current.lock() += by;
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.lock()
    }
}
