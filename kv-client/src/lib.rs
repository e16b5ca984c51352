//! # sharedkv-client
//!
//! Client library for sharedkv: an embeddable ordered key-value store that
//! mirrors its mutations to other instances over a WebSocket.
//!
//! ## Features
//!
//! - **Shared store handle**: [`SharedKv`] applies local edits synchronously
//!   and persists them through a [`PersistenceBridge`]
//! - **Best-effort sync**: [`SyncChannel`] sends local changes, applies
//!   remote ones and drops its own echoes
//! - **Connection supervision**: [`ConnectivitySupervisor`] keeps exactly one
//!   channel alive while an endpoint is configured and the host is online
//! - **Transport Abstraction**: Pluggable transport layer (WebSocket, memory, mock)
//!
//! ## Example
//!
//! ```ignore
//! use sharedkv_client::{
//!     ConnectivitySupervisor, JsonFilePersistence, SharedKv, SupervisorConfig,
//!     WebSocketTransport,
//! };
//!
//! let persistence = Arc::new(JsonFilePersistence::new("data.json"));
//! let kv = SharedKv::open(persistence.clone()).await?;
//! let endpoint = persistence.load_endpoint().await?;
//! let supervisor = ConnectivitySupervisor::spawn(
//!     kv.clone(),
//!     endpoint,
//!     WebSocketTransport::new,
//!     SupervisorConfig::default(),
//! );
//!
//! kv.set("greeting", json!("hello"));
//! supervisor.shutdown().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod debounce;
pub mod error;
pub mod kv;
pub mod persistence;
pub mod supervisor;
pub mod transport;

pub use channel::{
    ChannelConfig, ChannelOutcome, ChannelReport, ChannelStats, EchoPolicy, SyncChannel,
};
pub use debounce::Debouncer;
pub use error::{KvError, SendError};
pub use kv::{ChangeSink, ChangeSource, SharedKv, StoreEvent};
pub use persistence::{
    JsonFilePersistence, MemoryPersistence, PersistenceBridge, PersistenceError, Settings,
};
pub use supervisor::{ConnectivitySupervisor, SupervisorConfig, SupervisorStatus};
pub use transport::{
    MemoryHub, MemoryTransport, MockTransport, Transport, TransportError, WebSocketTransport,
};
