use serde::{Deserialize, Serialize};

/// How a blob's plaintext is typed once decrypted.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    #[serde(rename = "JSON")]
    Json,
    Buffer,
}

/// One entry of an identifier's `blobs` array. `length` counts plaintext
/// bytes; the wire carries `length` plus the sealer's overhead.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BlobKind,
    pub length: u64,
}

/// The record identifier: a JSON object naming the record type and
/// describing each payload blob that follows, in wire order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    pub blobs: Vec<BlobInfo>,
}

impl Identifier {
    pub fn new(kind: &str) -> Self {
        Identifier {
            kind: kind.to_owned(),
            version: None,
            blobs: Vec::new(),
        }
    }
}
