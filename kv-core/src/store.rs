//! Insertion-ordered key/value store.
//!
//! Iteration order is part of the store's contents: values keep the slot of
//! their first insertion across updates, and [`OrderedStore::set_at`] moves a
//! key to an explicit index. Reordering rebuilds the tail of the map, which
//! is fine for a rarely used, manually triggered operation.

use indexmap::IndexMap;
use serde_json::Value;
use sharedkv_types::{ChangeEvent, ChangeKind, Snapshot};
use thiserror::Error;

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Positional set outside `0..len` (measured after removing the key).
    #[error("invalid position {position}: store holds {len} other entries")]
    InvalidPosition {
        /// Requested index.
        position: usize,
        /// Entry count once any previous occurrence of the key is removed.
        len: usize,
    },
}

/// Ordered mapping from string keys to JSON values. Keys are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderedStore {
    entries: IndexMap<String, Value>,
}

impl OrderedStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding the snapshot's entries in snapshot order.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self { entries: snapshot }
    }

    /// Copy of the full contents, in order.
    pub fn to_snapshot(&self) -> Snapshot {
        self.entries.clone()
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Whether `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in current order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Values in current order.
    pub fn values(&self) -> Vec<Value> {
        self.entries.values().cloned().collect()
    }

    /// `(key, value)` pairs in current order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Borrowing iterator over the entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Insert or replace. Existing keys keep their position; new keys are
    /// appended. Returns the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    /// Set `key` so that it ends up at index `position`.
    ///
    /// Any existing entry for `key` is removed first and `position` is
    /// measured in the order that remains, so it must be below that length.
    /// On error the store is left untouched.
    pub fn set_at(
        &mut self,
        key: impl Into<String>,
        value: Value,
        position: usize,
    ) -> Result<Option<Value>, StoreError> {
        let key = key.into();
        let len = self.entries.len() - usize::from(self.entries.contains_key(&key));
        if position >= len {
            return Err(StoreError::InvalidPosition { position, len });
        }

        let previous = self.entries.shift_remove(&key);
        self.entries.shift_insert(position, key, value);
        Ok(previous)
    }

    /// Remove `key`, keeping the relative order of the rest. Absent keys are
    /// a no-op. Returns the removed value.
    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    /// Apply a change event. Applying the same event twice has the same
    /// effect as applying it once.
    pub fn apply(&mut self, event: &ChangeEvent) {
        match &event.kind {
            ChangeKind::Set { value } => {
                self.set(event.key.clone(), value.clone());
            }
            ChangeKind::Delete => {
                self.delete(&event.key);
            }
        }
    }
}
