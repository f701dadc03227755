use serde_json::Value;

/// One field of an application message: either a JSON-serialisable value or
/// an opaque byte buffer. The distinction survives the wire, so a peer
/// receives buffers as buffers and everything else as JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Buffer(Vec<u8>),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Buffer(_) => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&[u8]> {
        match self {
            Payload::Buffer(bytes) => Some(bytes),
            Payload::Json(_) => None,
        }
    }
}

/// An ordered field map. Insertion order is a wire invariant: blobs are laid
/// out on the wire in the order the fields were added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    fields: Vec<(String, Payload)>,
}

impl Message {
    pub fn new() -> Self {
        Message { fields: Vec::new() }
    }

    /// Adds a field, replacing any previous payload under the same id
    /// without disturbing its position.
    pub fn insert(&mut self, id: impl Into<String>, payload: Payload) {
        let id = id.into();
        match self.fields.iter_mut().find(|(name, _)| *name == id) {
            Some((_, existing)) => *existing = payload,
            None => self.fields.push((id, payload)),
        }
    }

    pub fn json(mut self, id: impl Into<String>, value: Value) -> Self {
        self.insert(id, Payload::Json(value));
        self
    }

    pub fn buffer(mut self, id: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(id, Payload::Buffer(bytes));
        self
    }

    pub fn get(&self, id: &str) -> Option<&Payload> {
        self.fields
            .iter()
            .find(|(name, _)| name == id)
            .map(|(_, payload)| payload)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Payload)> {
        self.fields
            .iter()
            .map(|(name, payload)| (name.as_str(), payload))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
