//! JSON codec for envelopes.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::ProtoError;

/// Encode a message as a JSON payload.
pub fn encode<T: Serialize>(msg: &T) -> Result<Bytes, ProtoError> {
    Ok(Bytes::from(serde_json::to_vec(msg)?))
}

/// Decode a JSON payload.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtoError> {
    Ok(serde_json::from_slice(payload)?)
}
