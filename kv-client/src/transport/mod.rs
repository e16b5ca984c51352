//! Transport abstraction for sharedkv.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying connection mechanism (WebSocket, in-process hub, mock).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` establishes a connection to an endpoint
//! - `send()` transmits one text frame
//! - `recv()` waits for the next inbound frame
//! - `close()` gracefully terminates
//!
//! A transport instance serves one connection. The supervisor asks its
//! factory for a fresh one every time it opens a channel.
//!
//! `recv()` must be cancel-safe: the channel task polls it inside
//! `tokio::select!` and drops the future whenever another branch wins.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.connect("ws://relay.local:8080").await?;
//! transport.send(r#"{"type":"delete","key":"a","update":1}"#).await?;
//! let frame = transport.recv().await?;
//! ```

mod memory;
mod mock;
mod websocket;

pub use memory::{MemoryHub, MemoryTransport};
pub use mock::MockTransport;
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint string is not a usable address.
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// Endpoint as configured.
        endpoint: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Transport trait for exchanging change frames with a relay.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, in-memory, mock).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the relay at `endpoint`.
    ///
    /// For WebSocket this is a `ws://` or `wss://` URL. For the in-memory
    /// hub it names a room; for the mock it is arbitrary.
    async fn connect(&self, endpoint: &str) -> Result<(), TransportError>;

    /// Send one text frame.
    async fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Receive the payload of the next data frame.
    ///
    /// Blocks until data is available or the connection closes.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
