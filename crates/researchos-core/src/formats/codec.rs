//! # Value Codec
//!
//! Every attribute value is stored as an opaque postcard payload keyed by the
//! BLAKE3 hash of those bytes. Two values that encode to the same bytes are
//! the same blob.
//!
//! ## Size Limit
//!
//! Payload size is validated BEFORE decoding so that a corrupted blob cannot
//! request an unbounded allocation.

use crate::primitives::MAX_VALUE_PAYLOAD_SIZE;
use crate::{ContentHash, RosError};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encode any serializable value to its stored byte form.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, RosError> {
    postcard::to_allocvec(value).map_err(|e| RosError::SerializationError(e.to_string()))
}

/// Encode a value and compute its content hash in one step.
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<(ContentHash, Vec<u8>), RosError> {
    let bytes = encode(value)?;
    Ok((content_hash(&bytes), bytes))
}

/// Decode a stored payload, rejecting anything over the default size limit.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RosError> {
    decode_with_limit(bytes, MAX_VALUE_PAYLOAD_SIZE)
}

/// Decode a stored payload with an explicit size limit.
pub fn decode_with_limit<T: DeserializeOwned>(bytes: &[u8], limit: usize) -> Result<T, RosError> {
    if bytes.len() > limit {
        return Err(RosError::SerializationError(format!(
            "Payload size {} exceeds maximum {}",
            bytes.len(),
            limit
        )));
    }
    postcard::from_bytes(bytes).map_err(|e| RosError::SerializationError(e.to_string()))
}

/// BLAKE3 digest of an encoded payload.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> ContentHash {
    ContentHash(*blake3::hash(bytes).as_bytes())
}
