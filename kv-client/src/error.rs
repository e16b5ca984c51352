//! Error types for sharedkv-client.

use sharedkv_core::StoreError;
use sharedkv_types::CodecError;
use thiserror::Error;

use crate::persistence::PersistenceError;

/// Errors surfaced to callers of [`SharedKv`](crate::SharedKv).
#[derive(Debug, Error)]
pub enum KvError {
    /// Positional set outside the valid range; the store is unchanged.
    #[error(transparent)]
    InvalidPosition(#[from] StoreError),

    /// Caller-supplied snapshot content is not a JSON object.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Loading the snapshot failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Why an outbound change was not queued for sending.
///
/// Local mutations discard this: sync is best-effort and never fails an edit.
#[derive(Debug, Error)]
pub enum SendError {
    /// The channel is not open.
    #[error("channel not open")]
    NotOpen,

    /// The change could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] CodecError),

    /// The channel task has already exited.
    #[error("outbound queue closed")]
    QueueClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_position_displays_store_error() {
        let err = KvError::from(StoreError::InvalidPosition {
            position: 4,
            len: 2,
        });
        assert_eq!(
            err.to_string(),
            "invalid position 4: store holds 2 other entries"
        );
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KvError>();
        assert_send_sync::<SendError>();
    }
}
