//! # Formats
//!
//! Byte-level encoding of stored values and rows.

mod codec;

pub use codec::{content_hash, decode, decode_with_limit, encode, encode_value};
