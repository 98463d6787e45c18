//! Liveness monitor: how long ago did a round trip last succeed?

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Snapshot returned by [`LivenessMonitor::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessStatus {
    /// True iff the last success is no older than the stale duration.
    pub healthy: bool,
    /// Age of the last successful resolution.
    pub since_last_success: Duration,
    #[allow(missing_docs)]
    pub stale_duration: Duration,
}

/// Tracks the time of the last successful resolution.
///
/// The timestamp is stored as milliseconds since construction in an atomic,
/// so the receiver (writer) and the health endpoint (reader) never contend on
/// a lock. Construction counts as a success so the service does not start out
/// stale.
#[derive(Debug)]
pub struct LivenessMonitor {
    origin: Instant,
    last_success_ms: AtomicU64,
    stale_duration: Duration,
}

impl LivenessMonitor {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(stale_duration: Duration) -> Self {
        Self {
            origin: Instant::now(),
            last_success_ms: AtomicU64::new(0),
            stale_duration,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Records a successful round trip at the current time.
    pub fn record_success(&self) {
        // fetch_max keeps the timestamp monotonic when writers race.
        self.last_success_ms
            .fetch_max(self.elapsed_ms(), Ordering::AcqRel);
    }

    /// Age of the last successful round trip.
    #[must_use]
    pub fn since_last_success(&self) -> Duration {
        let last = self.last_success_ms.load(Ordering::Acquire);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn stale_duration(&self) -> Duration {
        self.stale_duration
    }

    /// Healthy iff `now - last_success <= stale_duration`.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.since_last_success() <= self.stale_duration
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn check(&self) -> LivenessStatus {
        let since_last_success = self.since_last_success();
        LivenessStatus {
            healthy: since_last_success <= self.stale_duration,
            since_last_success,
            stale_duration: self.stale_duration,
        }
    }
}
