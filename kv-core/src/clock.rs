//! Timestamp source for outbound change events.

use sharedkv_types::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock reading in milliseconds.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(saturating_millis)
            .unwrap_or(0)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A clock that only moves when told to (for tests).
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading `millis`.
    pub fn new(millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(millis)),
        }
    }

    /// Set the reading.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Move the reading forward.
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Issues strictly increasing timestamps from a wall clock.
///
/// Two events sent within the same millisecond, or after the wall clock
/// stepped backwards, still get distinct increasing values.
pub struct TimestampClock {
    clock: Arc<dyn Clock>,
    last: Option<Timestamp>,
}

impl TimestampClock {
    /// Timestamps from the system clock.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Timestamps from the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, last: None }
    }

    /// Next timestamp. Never returns a value it returned before.
    pub fn next(&mut self) -> Timestamp {
        let now = Timestamp::new(self.clock.now_millis());
        let issued = match self.last {
            Some(last) if now <= last => last.next(),
            _ => now,
        };
        self.last = Some(issued);
        issued
    }

    /// Last timestamp issued.
    pub fn last(&self) -> Option<Timestamp> {
        self.last
    }
}

impl std::fmt::Debug for TimestampClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampClock")
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

impl Default for TimestampClock {
    fn default() -> Self {
        Self::system()
    }
}
