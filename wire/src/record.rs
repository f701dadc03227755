use byteorder::{BigEndian, ByteOrder};

use crate::identifier::{BlobInfo, BlobKind, Identifier};
use crate::message::{Message, Payload};
use crate::seal::Sealer;
use crate::WireError;

// LENGTH_PREFIX_SIZE is the number of bytes used to prefix encode the
// length of the sealed identifier.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// `build_record` serialises one record: the identifier is completed with a
/// blob descriptor per message field (insertion order preserved), then the
/// identifier and every blob are sealed independently and concatenated
/// behind the big-endian length prefix.
///
/// An identifier that cannot be framed behind the 16-bit prefix fails with
/// `IdentifierTooBig` before anything is sealed.
pub fn build_record(
    kind: &str,
    version: Option<u32>,
    message: &Message,
    sealer: &mut dyn Sealer,
) -> Result<Vec<u8>, WireError> {
    let mut identifier = Identifier {
        kind: kind.to_owned(),
        version,
        blobs: Vec::with_capacity(message.len()),
    };
    let mut bodies: Vec<Vec<u8>> = Vec::with_capacity(message.len());

    for (id, payload) in message.iter() {
        let (blob_kind, body) = match payload {
            Payload::Buffer(bytes) => (BlobKind::Buffer, bytes.clone()),
            Payload::Json(value) => (
                BlobKind::Json,
                serde_json::to_vec(value).map_err(WireError::json)?,
            ),
        };
        identifier.blobs.push(BlobInfo {
            id: id.to_owned(),
            kind: blob_kind,
            length: body.len() as u64,
        });
        bodies.push(body);
    }

    let serialised = serde_json::to_vec(&identifier).map_err(WireError::json)?;
    if serialised.len() > u16::MAX as usize {
        return Err(WireError::IdentifierTooBig(serialised.len()));
    }

    let sealed_identifier = sealer.seal(&serialised)?;
    // A sealed identifier can outgrow the prefix even when the plaintext
    // fits, because sealing adds the tag.
    let prefix = u16::try_from(sealed_identifier.len())
        .map_err(|_| WireError::IdentifierTooBig(sealed_identifier.len()))?;

    let body_len: usize = bodies.iter().map(|b| b.len() + sealer.overhead()).sum();
    let mut out =
        Vec::with_capacity(LENGTH_PREFIX_SIZE + sealed_identifier.len() + body_len);

    let mut prefix_bytes = [0; LENGTH_PREFIX_SIZE];
    BigEndian::write_u16(&mut prefix_bytes, prefix);
    out.extend_from_slice(&prefix_bytes);
    out.extend_from_slice(&sealed_identifier);

    for body in &bodies {
        out.extend_from_slice(&sealer.seal(body)?);
    }

    Ok(out)
}
