//! # sharedkv-types
//!
//! Wire format types for the sharedkv change protocol.
//!
//! This crate provides the foundational types used across all sharedkv crates:
//! - [`Timestamp`], [`OriginId`] - Ordering and identity types
//! - [`ChangeEvent`] - One mutation of the shared store
//! - [`wire`] - JSON encoding of change events, one object per frame
//! - [`Snapshot`] - Ordered key/value mapping used for persistence
//! - [`CodecError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod event;
mod ids;
pub mod wire;

pub use error::CodecError;
pub use event::{ChangeEvent, ChangeKind};
pub use ids::{OriginId, Timestamp};

/// Full contents of a store: string keys to arbitrary JSON values, in order.
///
/// Serializes as a plain JSON object; key order in the source text is kept
/// when deserializing.
pub type Snapshot = indexmap::IndexMap<String, serde_json::Value>;
