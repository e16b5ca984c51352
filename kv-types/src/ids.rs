//! Ordering and identity types for sharedkv.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical timestamp carried by every change event (`update` on the wire).
///
/// Milliseconds since the Unix epoch as read by the origin process when the
/// event was sent. A process never issues the same value twice.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a Timestamp with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this Timestamp.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The smallest timestamp strictly greater than this one.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Identifier of the process that produced a change event.
///
/// UUID v4, generated once per running store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginId(uuid::Uuid);

impl OriginId {
    /// Create a new random OriginId.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for OriginId {
    fn default() -> Self {
        Self::random()
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OriginId({})", &self.0.to_string()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_ordering() {
        let t1 = Timestamp::new(100);
        let t2 = Timestamp::new(200);
        assert!(t1 < t2);
    }

    #[test]
    fn timestamp_next_saturates() {
        assert_eq!(Timestamp::new(7).next().value(), 8);
        assert_eq!(Timestamp::new(u64::MAX).next().value(), u64::MAX);
    }

    #[test]
    fn timestamp_serializes_as_plain_integer() {
        let json = serde_json::to_string(&Timestamp::new(1700000000000)).unwrap();
        assert_eq!(json, "1700000000000");
    }

    #[test]
    fn origin_ids_are_distinct() {
        assert_ne!(OriginId::random(), OriginId::random());
        assert_eq!(OriginId::random().as_uuid().get_version_num(), 4);
    }

    #[test]
    fn origin_id_serializes_as_string() {
        let id = OriginId::random();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
