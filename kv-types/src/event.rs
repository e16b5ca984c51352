//! Change events: one mutation of the shared store.

use serde_json::Value;

use crate::{OriginId, Timestamp};

/// What a change event does to its key.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    /// Insert or replace the value stored under the key.
    Set {
        /// The new value.
        value: Value,
    },
    /// Remove the key.
    Delete,
}

/// A single store mutation as exchanged between peers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Key being mutated.
    pub key: String,
    /// Set or delete.
    pub kind: ChangeKind,
    /// Origin clock reading at send time.
    pub timestamp: Timestamp,
    /// Producing process, when origin tagging is enabled.
    pub origin: Option<OriginId>,
}

impl ChangeEvent {
    /// Create a `set` event.
    pub fn set(key: impl Into<String>, value: Value, timestamp: Timestamp) -> Self {
        Self {
            key: key.into(),
            kind: ChangeKind::Set { value },
            timestamp,
            origin: None,
        }
    }

    /// Create a `delete` event.
    pub fn delete(key: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            key: key.into(),
            kind: ChangeKind::Delete,
            timestamp,
            origin: None,
        }
    }

    /// Tag the event with the producing process.
    pub fn with_origin(mut self, origin: OriginId) -> Self {
        self.origin = Some(origin);
        self
    }

    /// The value carried by a `set` event.
    pub fn value(&self) -> Option<&Value> {
        match &self.kind {
            ChangeKind::Set { value } => Some(value),
            ChangeKind::Delete => None,
        }
    }

    /// Wire name of the event kind.
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            ChangeKind::Set { .. } => "set",
            ChangeKind::Delete => "delete",
        }
    }
}
