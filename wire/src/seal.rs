use crypto::{CryptoError, IvSequence, SymmetricKey, TAG_SIZE};

/// Seals one record segment (the identifier, or one blob). Each segment is
/// sealed independently, consuming one IV per segment.
pub trait Sealer {
    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Bytes the sealed form adds on top of the plaintext length.
    fn overhead(&self) -> usize;
}

/// Opens one record segment.
pub trait Opener {
    fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn overhead(&self) -> usize;
}

/// Identity transform for cleartext framing. The initial `Hello` record
/// travels in the clear; its sensitive parts are ciphertexts embedded as
/// ordinary buffers.
pub struct ClearText;

impl Sealer for ClearText {
    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(plaintext.to_vec())
    }

    fn overhead(&self) -> usize {
        0
    }
}

impl Opener for ClearText {
    fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(sealed.to_vec())
    }

    fn overhead(&self) -> usize {
        0
    }
}

/// AES-256-GCM sealing bound to one direction's IV sequence. The sequence
/// outlives any one key: it keeps counting across the handshake-key and
/// session-key phases, which keeps every (key, IV) pair unique.
pub struct AeadSealer<'a> {
    key: &'a SymmetricKey,
    ivs: &'a mut IvSequence,
}

impl<'a> AeadSealer<'a> {
    pub fn new(key: &'a SymmetricKey, ivs: &'a mut IvSequence) -> Self {
        AeadSealer { key, ivs }
    }
}

impl<'a> Sealer for AeadSealer<'a> {
    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let iv = self.ivs.next()?;
        crypto::seal(self.key, &iv, plaintext)
    }

    fn overhead(&self) -> usize {
        TAG_SIZE
    }
}

pub struct AeadOpener<'a> {
    key: &'a SymmetricKey,
    ivs: &'a mut IvSequence,
}

impl<'a> AeadOpener<'a> {
    pub fn new(key: &'a SymmetricKey, ivs: &'a mut IvSequence) -> Self {
        AeadOpener { key, ivs }
    }
}

impl<'a> Opener for AeadOpener<'a> {
    fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let iv = self.ivs.next()?;
        crypto::open(self.key, &iv, sealed)
    }

    fn overhead(&self) -> usize {
        TAG_SIZE
    }
}
