use elliptic_curve::sec1::ToEncodedPoint;
use p521::ecdh::{self, EphemeralSecret};
use rand::rngs::OsRng;

use crate::iv::IV_SIZE;
use crate::keys::{
    import_public_key, KeyPair, PublicKey, SymmetricKey, RAW_PUBLIC_KEY_SIZE,
    SYMMETRIC_KEY_SIZE,
};
use crate::{aead, CryptoError};

// The derived key encrypts exactly one message, so a constant IV is sound.
const ONE_SHOT_IV: [u8; IV_SIZE] = [0; IV_SIZE];

/// `ecies_encrypt` seals `plaintext` so that only the holder of the
/// recipient's private key can recover it:
///
/// 1. generate an ephemeral P-521 keypair,
/// 2. agree a shared secret with the recipient's public key,
/// 3. take the leading 256 bits of the raw secret as a one-shot AES key,
/// 4. emit `ephemeral_pub_raw(133) ‖ AES-256-GCM ciphertext`.
pub fn ecies_encrypt(plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_pub = ephemeral.public_key().to_encoded_point(false);
    let shared = ephemeral.diffie_hellman(recipient);
    let key = one_shot_key(shared.raw_secret_bytes().as_slice());

    let ciphertext = aead::seal(&key, &ONE_SHOT_IV, plaintext)?;

    let mut out = Vec::with_capacity(RAW_PUBLIC_KEY_SIZE + ciphertext.len());
    out.extend_from_slice(ephemeral_pub.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// `ecies_decrypt` reverses `ecies_encrypt` with our static private key.
/// The leading 133 bytes carry the sender's ephemeral public key.
pub fn ecies_decrypt(buf: &[u8], local: &KeyPair) -> Result<Vec<u8>, CryptoError> {
    if buf.len() < RAW_PUBLIC_KEY_SIZE + aead::TAG_SIZE {
        return Err(CryptoError::InvalidPoint);
    }
    let (ephemeral_raw, ciphertext) = buf.split_at(RAW_PUBLIC_KEY_SIZE);
    let ephemeral = import_public_key(ephemeral_raw)?;
    let shared = ecdh::diffie_hellman(local.secret().to_nonzero_scalar(), ephemeral.as_affine());
    let key = one_shot_key(shared.raw_secret_bytes().as_slice());

    aead::open(&key, &ONE_SHOT_IV, ciphertext)
}

// The WebCrypto ECDH bit-derivation the protocol assumes: the leading 256
// bits of the raw shared secret, no KDF.
fn one_shot_key(shared: &[u8]) -> SymmetricKey {
    let mut bytes = [0; SYMMETRIC_KEY_SIZE];
    bytes.copy_from_slice(&shared[..SYMMETRIC_KEY_SIZE]);
    SymmetricKey::from_raw(bytes)
}
