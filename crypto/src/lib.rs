#![forbid(unsafe_code)]

use std::{error, fmt};

mod aead;
mod ecies;
mod iv;
mod keys;

pub use self::aead::{open, seal, TAG_SIZE};
pub use self::ecies::{ecies_decrypt, ecies_encrypt};
pub use self::iv::{Direction, IvSequence, IV_COUNTER_LIMIT, IV_SIZE};
pub use self::keys::{
    export_public_key, import_public_key, KeyPair, PublicKey, SymmetricKey,
    RAW_PUBLIC_KEY_SIZE, SYMMETRIC_KEY_SIZE,
};

pub mod hex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    // AES-GCM rejected the ciphertext. The authentication tag is the only
    // integrity check in the protocol, so this is always fatal to a session.
    Auth,
    // The IV counter reached its bound; the key must not be used again.
    IvExhausted,
    // Key material of the wrong size or encoding.
    InvalidKey(String),
    // A buffer that should hold a SEC1 point does not.
    InvalidPoint,
    // A hex string that does not decode.
    InvalidHex,
}

impl error::Error for CryptoError {}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::CryptoError::*;

        match self {
            Auth => write!(f, "authenticated decryption failed"),
            IvExhausted => write!(f, "iv counter exhausted"),
            InvalidKey(msg) => write!(f, "invalid key material: {}", msg),
            InvalidPoint => write!(f, "invalid curve point encoding"),
            InvalidHex => write!(f, "invalid hex encoding"),
        }
    }
}
