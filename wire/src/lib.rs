#![forbid(unsafe_code)]

use std::{error, fmt};

use crypto::CryptoError;

mod identifier;
mod message;
mod reader;
mod record;
mod seal;

pub use self::identifier::{BlobInfo, BlobKind, Identifier};
pub use self::message::{Message, Payload};
pub use self::reader::{Record, RecordReader};
pub use self::record::{build_record, LENGTH_PREFIX_SIZE};
pub use self::seal::{AeadOpener, AeadSealer, ClearText, Opener, Sealer};

#[derive(Debug, Clone)]
pub enum WireError {
    // The serialised identifier does not fit the 16-bit length prefix.
    IdentifierTooBig(usize),
    // A blob descriptor announces a length this host cannot buffer.
    BlobTooBig(u64),
    // Identifier or JSON blob that does not parse.
    Json(String),
    Crypto(CryptoError),
}

impl WireError {
    pub(crate) fn json(e: serde_json::Error) -> Self {
        WireError::Json(e.to_string())
    }
}

impl From<CryptoError> for WireError {
    fn from(e: CryptoError) -> Self {
        WireError::Crypto(e)
    }
}

impl error::Error for WireError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            WireError::Crypto(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::WireError::*;

        match self {
            IdentifierTooBig(len) => {
                write!(f, "serialised identifier of {} bytes exceeds 65535", len)
            }
            BlobTooBig(len) => write!(f, "blob of {} bytes cannot be buffered", len),
            Json(msg) => write!(f, "malformed json: {}", msg),
            Crypto(e) => write!(f, "crypto failure: {}", e),
        }
    }
}
