//! Lowercase hex codec, no separators, exact round-trip.

use crate::{CryptoError, Result};

/// Encode bytes as lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode a lowercase (or mixed-case) hex string back into bytes.
pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| CryptoError::InvalidHex(e.to_string()))
}
