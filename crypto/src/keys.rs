use std::fmt;

use elliptic_curve::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use elliptic_curve::sec1::ToEncodedPoint;
use p521::{NistP521, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::CryptoError;

pub type PublicKey = elliptic_curve::PublicKey<NistP521>;

// RAW_PUBLIC_KEY_SIZE is the length of a P-521 public key in raw
// uncompressed SEC1 form: 0x04 followed by the 66-byte X and Y coordinates.
pub const RAW_PUBLIC_KEY_SIZE: usize = 133;

// SYMMETRIC_KEY_SIZE is the length of an AES-256 key.
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// `KeyPair` is a static P-521 ECDH keypair. The secret half never leaves
/// the handle except through `to_pkcs8_der`, which the store uses for
/// persistence; everything else works with the public half.
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        KeyPair { secret, public }
    }

    /// Imports a private key from PKCS#8 DER and recomputes the public half.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_pkcs8_der(der)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let public = secret.public_key();
        Ok(KeyPair { secret, public })
    }

    /// Exports the private key in PKCS#8 DER form.
    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>, CryptoError> {
        let document = self
            .secret
            .to_pkcs8_der()
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(document.as_bytes().to_vec())
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn public_raw(&self) -> [u8; RAW_PUBLIC_KEY_SIZE] {
        export_public_key(&self.public)
    }

    pub(crate) fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "KeyPair [ public: {} ]",
            crate::hex::encode(&self.public_raw()[..])
        )
    }
}

/// `export_public_key` serialises a public key into its 133-byte raw
/// uncompressed form.
pub fn export_public_key(key: &PublicKey) -> [u8; RAW_PUBLIC_KEY_SIZE] {
    let point = key.to_encoded_point(false);
    let mut raw = [0; RAW_PUBLIC_KEY_SIZE];
    raw.copy_from_slice(point.as_bytes());
    raw
}

/// `import_public_key` parses the 133-byte raw uncompressed form. Any other
/// length, or an encoding that is not a point on the curve, is rejected.
pub fn import_public_key(raw: &[u8]) -> Result<PublicKey, CryptoError> {
    if raw.len() != RAW_PUBLIC_KEY_SIZE {
        return Err(CryptoError::InvalidPoint);
    }
    PublicKey::from_sec1_bytes(raw).map_err(|_| CryptoError::InvalidPoint)
}

/// `SymmetricKey` holds an AES-256 key. The handle deliberately implements
/// neither `Clone` nor any serialisation; the raw bytes are zeroised when
/// the handle is dropped.
pub struct SymmetricKey {
    bytes: [u8; SYMMETRIC_KEY_SIZE],
}

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut bytes = [0; SYMMETRIC_KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        SymmetricKey { bytes }
    }

    pub fn from_raw(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        SymmetricKey { bytes }
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        if slice.len() != SYMMETRIC_KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                SYMMETRIC_KEY_SIZE,
                slice.len()
            )));
        }
        let mut bytes = [0; SYMMETRIC_KEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(SymmetricKey { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SymmetricKey [ redacted ]")
    }
}
