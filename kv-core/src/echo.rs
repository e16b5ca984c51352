//! In-flight echo marker.
//!
//! A channel remembers the timestamps of the changes it has sent and not
//! yet seen come back. When a message carrying one of them arrives, it is
//! the peer (or relay) reflecting our own change and not a new remote
//! mutation.
//!
//! Several sends can be in flight at once. If only the newest were kept,
//! the echo of an older edit to the same key would be applied as a remote
//! change and roll the store back. A single connection delivers in order,
//! so a matched echo also retires every marker armed before it.

use sharedkv_types::Timestamp;
use std::collections::VecDeque;

/// Most markers kept at once. The oldest is dropped beyond this, which only
/// happens when the peer does not reflect at all.
pub const MAX_IN_FLIGHT: usize = 64;

/// In-flight markers for outbound changes, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchoGuard {
    in_flight: VecDeque<Timestamp>,
}

impl EchoGuard {
    /// Create a clear guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `timestamp` as in flight. Returns the marker evicted to stay
    /// within [`MAX_IN_FLIGHT`], if any.
    pub fn arm(&mut self, timestamp: Timestamp) -> Option<Timestamp> {
        self.in_flight.push_back(timestamp);
        if self.in_flight.len() > MAX_IN_FLIGHT {
            self.in_flight.pop_front()
        } else {
            None
        }
    }

    /// Most recent timestamp in flight.
    pub fn pending(&self) -> Option<Timestamp> {
        self.in_flight.back().copied()
    }

    /// Number of timestamps in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether any timestamp is in flight.
    pub fn is_pending(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Whether `timestamp` is in flight.
    pub fn is_echo(&self, timestamp: Timestamp) -> bool {
        self.in_flight.contains(&timestamp)
    }

    /// Retire `timestamp` and every marker armed before it.
    ///
    /// Returns `true` when the message was our own echo.
    pub fn take_echo(&mut self, timestamp: Timestamp) -> bool {
        match self.in_flight.iter().position(|t| *t == timestamp) {
            Some(index) => {
                self.in_flight.drain(..=index);
                true
            }
            None => false,
        }
    }

    /// Forget every marker.
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: u64) -> Timestamp {
        Timestamp::new(ms)
    }

    #[test]
    fn starts_clear() {
        let guard = EchoGuard::new();
        assert!(!guard.is_pending());
        assert_eq!(guard.pending(), None);
    }

    #[test]
    fn arm_sets_pending() {
        let mut guard = EchoGuard::new();
        assert_eq!(guard.arm(ts(10)), None);
        assert_eq!(guard.pending(), Some(ts(10)));
    }

    #[test]
    fn rearm_keeps_earlier_marker() {
        let mut guard = EchoGuard::new();
        guard.arm(ts(10));
        guard.arm(ts(11));

        assert_eq!(guard.pending(), Some(ts(11)));
        assert_eq!(guard.in_flight(), 2);
        assert!(guard.is_echo(ts(10)));
        assert!(guard.is_echo(ts(11)));
    }

    #[test]
    fn echoes_in_send_order_are_all_recognised() {
        let mut guard = EchoGuard::new();
        guard.arm(ts(10));
        guard.arm(ts(11));

        assert!(guard.take_echo(ts(10)));
        assert_eq!(guard.pending(), Some(ts(11)));
        assert!(guard.take_echo(ts(11)));
        assert!(!guard.is_pending());
    }

    #[test]
    fn matching_echo_clears() {
        let mut guard = EchoGuard::new();
        guard.arm(ts(10));

        assert!(guard.take_echo(ts(10)));
        assert!(!guard.is_pending());
        // A second copy of the same message is no longer an echo.
        assert!(!guard.take_echo(ts(10)));
    }

    #[test]
    fn later_echo_retires_lost_ones() {
        let mut guard = EchoGuard::new();
        guard.arm(ts(10));
        guard.arm(ts(11));
        guard.arm(ts(12));

        assert!(guard.take_echo(ts(11)));
        assert!(!guard.is_echo(ts(10)));
        assert_eq!(guard.in_flight(), 1);
    }

    #[test]
    fn foreign_timestamp_keeps_markers() {
        let mut guard = EchoGuard::new();
        guard.arm(ts(10));

        assert!(!guard.take_echo(ts(9)));
        assert_eq!(guard.pending(), Some(ts(10)));
    }

    #[test]
    fn oldest_marker_evicted_at_capacity() {
        let mut guard = EchoGuard::new();
        for ms in 0..MAX_IN_FLIGHT as u64 {
            assert_eq!(guard.arm(ts(ms)), None);
        }

        assert_eq!(guard.arm(ts(1000)), Some(ts(0)));
        assert_eq!(guard.in_flight(), MAX_IN_FLIGHT);
        assert!(!guard.is_echo(ts(0)));
        assert!(guard.is_echo(ts(1000)));
    }

    #[test]
    fn clear_forgets_markers() {
        let mut guard = EchoGuard::new();
        guard.arm(ts(10));
        guard.arm(ts(11));
        guard.clear();
        assert!(!guard.is_pending());
    }
}
