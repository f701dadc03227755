use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::iv::IV_SIZE;
use crate::keys::SymmetricKey;
use crate::CryptoError;

// TAG_SIZE is the length of the GCM authentication tag appended to every
// ciphertext: ciphertext length = plaintext length + TAG_SIZE.
pub const TAG_SIZE: usize = 16;

/// `seal` encrypts `plaintext` under AES-256-GCM with the given 96-bit IV.
/// The authentication tag is appended to the returned ciphertext.
pub fn seal(
    key: &SymmetricKey,
    iv: &[u8; IV_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    cipher(key)?
        .encrypt(Nonce::from_slice(&iv[..]), plaintext)
        .map_err(|_| CryptoError::Auth)
}

/// `open` decrypts and authenticates a `seal` output. A tag mismatch
/// surfaces as `CryptoError::Auth`; this check is the sole source of
/// integrity enforcement in the protocol.
pub fn open(
    key: &SymmetricKey,
    iv: &[u8; IV_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    cipher(key)?
        .decrypt(Nonce::from_slice(&iv[..]), ciphertext)
        .map_err(|_| CryptoError::Auth)
}

fn cipher(key: &SymmetricKey) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(&key.as_bytes()[..])
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}
