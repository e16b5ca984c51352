//! Error types for sharedkv-relay.

/// Main error type for relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// WebSocket handshake failed or timed out.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
