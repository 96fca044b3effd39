//! Error types for protocol encoding.

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Debug, Error, Clone)]
pub enum ProtoError {
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A reply claimed success without a body, or failure without an error.
    #[error("malformed reply: {0}")]
    MalformedReply(String),
}

impl From<serde_json::Error> for ProtoError {
    fn from(err: serde_json::Error) -> Self {
        ProtoError::Serialization(err.to_string())
    }
}
