//! Error types for the sharedkv wire format.

use thiserror::Error;

/// Errors that can occur while encoding or decoding change events.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The frame is not valid JSON or does not match the message shape.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// A `set` message arrived without a `value` field.
    #[error("set message for key {key:?} carries no value")]
    MissingValue {
        /// Key named by the message.
        key: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CodecError::MissingValue { key: "a".into() };
        assert_eq!(err.to_string(), "set message for key \"a\" carries no value");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CodecError>();
    }
}
