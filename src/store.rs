//! Persistent home of the static keypair and the peer directory. The
//! engine itself never touches a store; the layer that resolves petnames
//! to addresses and keys does, before handing control to `connect`.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::{error, fmt, fs};

use serde::{Deserialize, Serialize};

use crypto::KeyPair;

/// A record binding a petname to a peer's address and public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acquaintance {
    pub petname: String,
    pub address: String,
    #[serde(with = "serde_hex")]
    pub public_key: Vec<u8>,
}

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Corrupt(String),
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl error::Error for StoreError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Corrupt(_) => None,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "store io error: {}", e),
            StoreError::Corrupt(msg) => write!(f, "store corrupt: {}", msg),
        }
    }
}

pub trait Store: Send + Sync {
    fn read_keypair(&self) -> Result<Option<KeyPair>, StoreError>;
    fn write_keypair(&self, keypair: &KeyPair) -> Result<(), StoreError>;
    fn read_acquaintance(&self, petname: &str) -> Result<Option<Acquaintance>, StoreError>;
    /// Upsert by petname.
    fn add_acquaintance(&self, acquaintance: Acquaintance) -> Result<(), StoreError>;
    fn remove_acquaintance(&self, petname: &str) -> Result<(), StoreError>;
}

/// Volatile store; holds the keypair as PKCS#8 so reads hand back a fresh
/// handle rather than sharing one.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    keypair_pkcs8: Option<Vec<u8>>,
    acquaintances: HashMap<String, Acquaintance>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn read_keypair(&self) -> Result<Option<KeyPair>, StoreError> {
        let inner = self.inner.lock().unwrap();
        match &inner.keypair_pkcs8 {
            Some(der) => KeyPair::from_pkcs8_der(der)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(e.to_string())),
            None => Ok(None),
        }
    }

    fn write_keypair(&self, keypair: &KeyPair) -> Result<(), StoreError> {
        let der = keypair
            .to_pkcs8_der()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.inner.lock().unwrap().keypair_pkcs8 = Some(der);
        Ok(())
    }

    fn read_acquaintance(&self, petname: &str) -> Result<Option<Acquaintance>, StoreError> {
        Ok(self.inner.lock().unwrap().acquaintances.get(petname).cloned())
    }

    fn add_acquaintance(&self, acquaintance: Acquaintance) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .acquaintances
            .insert(acquaintance.petname.clone(), acquaintance);
        Ok(())
    }

    fn remove_acquaintance(&self, petname: &str) -> Result<(), StoreError> {
        self.inner.lock().unwrap().acquaintances.remove(petname);
        Ok(())
    }
}

/// One JSON document on disk. The private key is stored as PKCS#8 hex;
/// encrypting it at rest is the caller's concern, not the engine's.
pub struct FileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

#[derive(Default, Serialize, Deserialize)]
struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    keypair_pkcs8: Option<String>,
    #[serde(default)]
    acquaintances: Vec<Acquaintance>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<Document, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Document::default()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn save(&self, document: &Document) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}

impl Store for FileStore {
    fn read_keypair(&self) -> Result<Option<KeyPair>, StoreError> {
        let _guard = self.guard.lock().unwrap();
        let document = self.load()?;
        match document.keypair_pkcs8 {
            Some(text) => {
                let der = crypto::hex::decode(&text)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                KeyPair::from_pkcs8_der(&der)
                    .map(Some)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))
            }
            None => Ok(None),
        }
    }

    fn write_keypair(&self, keypair: &KeyPair) -> Result<(), StoreError> {
        let _guard = self.guard.lock().unwrap();
        let mut document = self.load()?;
        let der = keypair
            .to_pkcs8_der()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        document.keypair_pkcs8 = Some(crypto::hex::encode(&der));
        self.save(&document)
    }

    fn read_acquaintance(&self, petname: &str) -> Result<Option<Acquaintance>, StoreError> {
        let _guard = self.guard.lock().unwrap();
        let document = self.load()?;
        Ok(document
            .acquaintances
            .into_iter()
            .find(|a| a.petname == petname))
    }

    fn add_acquaintance(&self, acquaintance: Acquaintance) -> Result<(), StoreError> {
        let _guard = self.guard.lock().unwrap();
        let mut document = self.load()?;
        document
            .acquaintances
            .retain(|a| a.petname != acquaintance.petname);
        document.acquaintances.push(acquaintance);
        self.save(&document)
    }

    fn remove_acquaintance(&self, petname: &str) -> Result<(), StoreError> {
        let _guard = self.guard.lock().unwrap();
        let mut document = self.load()?;
        document.acquaintances.retain(|a| a.petname != petname);
        self.save(&document)
    }
}

mod serde_hex {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&crypto::hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        crypto::hex::decode(&text).map_err(D::Error::custom)
    }
}
