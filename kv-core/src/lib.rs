//! # sharedkv-core
//!
//! Pure logic for sharedkv (no I/O, instant tests).
//!
//! This crate implements the data structure and the state machines behind
//! the shared store without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (network, disk) is performed by `sharedkv-client`, which
//! interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod debounce;
pub mod echo;
pub mod state;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock, TimestampClock};
pub use debounce::{DebounceWindow, DEFAULT_QUIET_PERIOD};
pub use echo::{EchoGuard, MAX_IN_FLIGHT};
pub use state::{
    Action, ChannelState, ConnectivityState, Event, LinkNotice, Phase, DEFAULT_RETRY_DELAY,
};
pub use store::{OrderedStore, StoreError};
