//! Hex codec for raw key material and wire-visible identifiers.

use crate::CryptoError;

pub fn encode(data: &[u8]) -> String {
    ::hex::encode(data)
}

pub fn decode(text: &str) -> Result<Vec<u8>, CryptoError> {
    ::hex::decode(text).map_err(|_| CryptoError::InvalidHex)
}
