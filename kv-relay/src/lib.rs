//! # sharedkv-relay
//!
//! WebSocket relay for sharedkv stores.
//!
//! The relay never looks inside frames. Every text or binary frame a peer
//! sends is forwarded to the other peers connected on the same URL path:
//!
//! ```text
//! Store A ──┐                         ┌── Store B
//!           │   ws://relay/office     │
//!           ├────────────────────────►│
//!       ┌───┴─────────────────────────┴───┐
//!       │          sharedkv-relay         │
//!       │   rooms keyed by request path   │
//!       └─────────────────────────────────┘
//! ```
//!
//! Setting `reflect_to_sender` also sends each frame back to its author,
//! which is how some shared relays behave; clients discard those echoes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod server;

pub use config::{Config, ConfigError, ServerConfig};
pub use error::{RelayError, Result};
pub use server::{Relay, RelayMetrics};
