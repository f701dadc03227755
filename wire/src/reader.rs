use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BytesMut};

use crate::identifier::{BlobKind, Identifier};
use crate::message::{Message, Payload};
use crate::record::LENGTH_PREFIX_SIZE;
use crate::seal::Opener;
use crate::WireError;

/// One fully parsed record.
#[derive(Debug)]
pub struct Record {
    pub identifier: Identifier,
    pub message: Message,
}

enum ReadState {
    // Waiting for the 2-byte length prefix.
    Length,
    // Waiting for the sealed identifier.
    Identifier { wire_length: usize },
    // Waiting for blob `collected.len()` of the identifier's descriptors.
    Blobs {
        identifier: Identifier,
        collected: Vec<Vec<u8>>,
    },
}

/// `RecordReader` teases records out of an unbounded incoming byte stream.
/// Chunks arrive with no framing assumed; the reader buffers them and
/// yields one decrypted record at a time, pausing wherever the next
/// quantity has not fully arrived.
pub struct RecordReader {
    buffer: BytesMut,
    state: ReadState,
}

impl Default for RecordReader {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordReader {
    pub fn new() -> Self {
        RecordReader {
            buffer: BytesMut::new(),
            state: ReadState::Length,
        }
    }

    /// Appends an opaque chunk to the in-buffer.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drives the parse state machine as far as the buffered bytes allow.
    /// Returns one complete record, or `None` once a required quantity is
    /// not yet available. Errors are fatal: the caller is expected to tear
    /// the connection down, so the reader's state past an error is
    /// unspecified.
    pub fn next_record(
        &mut self,
        opener: &mut dyn Opener,
    ) -> Result<Option<Record>, WireError> {
        loop {
            match std::mem::replace(&mut self.state, ReadState::Length) {
                ReadState::Length => {
                    if self.buffer.len() < LENGTH_PREFIX_SIZE {
                        return Ok(None);
                    }
                    let wire_length =
                        BigEndian::read_u16(&self.buffer[..LENGTH_PREFIX_SIZE]) as usize;
                    self.buffer.advance(LENGTH_PREFIX_SIZE);
                    self.state = ReadState::Identifier { wire_length };
                }
                ReadState::Identifier { wire_length } => {
                    if self.buffer.len() < wire_length {
                        self.state = ReadState::Identifier { wire_length };
                        return Ok(None);
                    }
                    let sealed = self.buffer.split_to(wire_length);
                    let plaintext = opener.open(&sealed)?;
                    let identifier: Identifier =
                        serde_json::from_slice(&plaintext).map_err(WireError::json)?;
                    self.state = ReadState::Blobs {
                        collected: Vec::with_capacity(identifier.blobs.len()),
                        identifier,
                    };
                }
                ReadState::Blobs {
                    identifier,
                    mut collected,
                } => {
                    if collected.len() == identifier.blobs.len() {
                        let message = assemble(&identifier, collected)?;
                        return Ok(Some(Record {
                            identifier,
                            message,
                        }));
                    }

                    let info = &identifier.blobs[collected.len()];
                    let wire_length = usize::try_from(info.length)
                        .ok()
                        .and_then(|len| len.checked_add(opener.overhead()))
                        .ok_or(WireError::BlobTooBig(info.length))?;
                    if self.buffer.len() < wire_length {
                        self.state = ReadState::Blobs {
                            identifier,
                            collected,
                        };
                        return Ok(None);
                    }
                    let sealed = self.buffer.split_to(wire_length);
                    collected.push(opener.open(&sealed)?);
                    self.state = ReadState::Blobs {
                        identifier,
                        collected,
                    };
                }
            }
        }
    }
}

fn assemble(identifier: &Identifier, bodies: Vec<Vec<u8>>) -> Result<Message, WireError> {
    let mut message = Message::new();
    for (info, body) in identifier.blobs.iter().zip(bodies) {
        let payload = match info.kind {
            BlobKind::Buffer => Payload::Buffer(body),
            BlobKind::Json => {
                Payload::Json(serde_json::from_slice(&body).map_err(WireError::json)?)
            }
        };
        message.insert(info.id.clone(), payload);
    }
    Ok(message)
}
