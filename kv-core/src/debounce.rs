//! Leading-edge debounce window.
//!
//! The first hit fires immediately. Hits arriving within the quiet period
//! after the previous hit are swallowed, and each swallowed hit extends the
//! quiet period. Once the period elapses with no hit, the next hit fires
//! again.

use std::time::{Duration, Instant};

/// Quiet period used for external snapshot changes.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(500);

/// Pure debounce bookkeeping; the caller supplies the current time.
#[derive(Debug, Clone)]
pub struct DebounceWindow {
    quiet: Duration,
    quiet_until: Option<Instant>,
}

impl DebounceWindow {
    /// Create a window with the given quiet period.
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            quiet_until: None,
        }
    }

    /// Record a hit at `now`. Returns `true` when the handler should run.
    pub fn hit(&mut self, now: Instant) -> bool {
        let fire = self.quiet_until.map_or(true, |until| now >= until);
        self.quiet_until = Some(now + self.quiet);
        fire
    }

    /// Forget previous hits so the next one fires.
    pub fn reset(&mut self) {
        self.quiet_until = None;
    }

    /// Configured quiet period.
    pub fn quiet(&self) -> Duration {
        self.quiet
    }
}

impl Default for DebounceWindow {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_PERIOD)
    }
}
