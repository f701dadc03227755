use std::{error, fmt};

use crypto::CryptoError;
use wire::WireError;

/// Why a session ended, or why an operation on one failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The transport failed underneath the session.
    TransportFailed(String),
    /// The handshake could not be completed.
    HandshakeFailed(String),
    /// The peer offered a protocol version we do not speak. `None` means
    /// the version field was missing entirely.
    UnsupportedVersion(Option<u32>),
    /// Authenticated decryption failed after the session opened.
    Auth,
    /// The peer broke the protocol: an unknown record type, an
    /// acknowledgement with nothing outstanding, a redirect aimed at a
    /// listening peer.
    ProtocolViolation(String),
    /// A record identifier outgrew its 16-bit length prefix. Fails the
    /// offending send only; the session survives.
    IdentifierTooBig(usize),
    /// An IV counter reached its bound; the session key must not be used
    /// again.
    IvExhausted,
    /// The local caller closed the session.
    LocalClose(Option<String>),
    /// The peer redirected the session elsewhere.
    Redirected,
    /// The session is gone.
    Closed,
}

impl Error {
    /// Contextualises a codec failure: the same wire error is a handshake
    /// failure before the session opens and its own kind afterwards.
    pub(crate) fn from_wire(e: WireError, open: bool) -> Self {
        match e {
            WireError::IdentifierTooBig(len) => Error::IdentifierTooBig(len),
            WireError::Crypto(e) => Error::from_crypto(e, open),
            WireError::Json(msg) => {
                if open {
                    Error::ProtocolViolation(msg)
                } else {
                    Error::HandshakeFailed(msg)
                }
            }
            WireError::BlobTooBig(len) => {
                let msg = format!("blob of {} bytes cannot be buffered", len);
                if open {
                    Error::ProtocolViolation(msg)
                } else {
                    Error::HandshakeFailed(msg)
                }
            }
        }
    }

    pub(crate) fn from_crypto(e: CryptoError, open: bool) -> Self {
        match e {
            CryptoError::IvExhausted => Error::IvExhausted,
            CryptoError::Auth if open => Error::Auth,
            other => {
                if open {
                    Error::ProtocolViolation(other.to_string())
                } else {
                    Error::HandshakeFailed(other.to_string())
                }
            }
        }
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::Error::*;

        match self {
            TransportFailed(msg) => write!(f, "transport failed: {}", msg),
            HandshakeFailed(msg) => write!(f, "handshake failed: {}", msg),
            UnsupportedVersion(Some(version)) => {
                write!(f, "unsupported protocol version {}", version)
            }
            UnsupportedVersion(None) => write!(f, "missing protocol version"),
            Auth => write!(f, "authenticated decryption failed"),
            ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            IdentifierTooBig(len) => {
                write!(f, "record identifier of {} bytes exceeds 65535", len)
            }
            IvExhausted => write!(f, "iv counter exhausted"),
            LocalClose(Some(reason)) => write!(f, "closed locally: {}", reason),
            LocalClose(None) => write!(f, "closed locally"),
            Redirected => write!(f, "session redirected"),
            Closed => write!(f, "session closed"),
        }
    }
}
