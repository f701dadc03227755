use serde::{Deserialize, Serialize};
use serde_json::Value;

use crypto::{
    ecies_decrypt, ecies_encrypt, import_public_key, CryptoError, IvSequence, KeyPair,
    PublicKey, SymmetricKey,
};
use wire::{build_record, AeadSealer, ClearText, Message, Payload, Record};

use crate::error::Error;
use crate::record_type::RecordType;

// The only version of the protocol this engine speaks.
pub(crate) const PROTOCOL_VERSION: u32 = 0;

const HANDSHAKE_KEY_FIELD: &str = "handshakeKey";
const HELLO_DATA_FIELD: &str = "helloData";
const CONNECTION_INFO_FIELD: &str = "connectionInfo";
const SESSION_KEY_FIELD: &str = "sessionKey";

// The authenticated core of a `Hello` record, sealed under the handshake
// key so that only a receiver able to unwrap that key learns who is
// calling.
#[derive(Serialize, Deserialize)]
struct HelloData {
    #[serde(rename = "initiatorPublicKey")]
    initiator_public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
}

/// What a receiver learns from a valid `Hello`.
pub(crate) struct AcceptedHello {
    pub handshake_key: SymmetricKey,
    pub initiator_public: PublicKey,
    pub initiator_public_raw: Vec<u8>,
    pub hello_value: Option<Value>,
    pub connection_info: Option<Value>,
}

/// Builds the opening `Hello` record. The framing travels in the clear;
/// the handshake key is ECIES-wrapped for the receiver, and `helloData`
/// is sealed under that key with the initiator's first IV. Returns the
/// record and the handshake key the `AuthHello` reply will arrive under.
pub(crate) fn build_hello(
    keypair: &KeyPair,
    receiver_public: &PublicKey,
    hello_value: Option<&Value>,
    connection_info: Option<&Value>,
    enc_ivs: &mut IvSequence,
) -> Result<(Vec<u8>, SymmetricKey), Error> {
    let handshake_key = SymmetricKey::generate();
    let wrapped_key =
        ecies_encrypt(&handshake_key.as_bytes()[..], receiver_public).map_err(crypto_failed)?;

    let hello_data = HelloData {
        initiator_public_key: crypto::hex::encode(&keypair.public_raw()[..]),
        value: hello_value.cloned(),
    };
    let serialised =
        serde_json::to_vec(&hello_data).map_err(|e| Error::HandshakeFailed(e.to_string()))?;
    let iv = enc_ivs.next().map_err(crypto_failed)?;
    let sealed_data = crypto::seal(&handshake_key, &iv, &serialised).map_err(crypto_failed)?;

    let mut message = Message::new()
        .buffer(HANDSHAKE_KEY_FIELD, wrapped_key)
        .buffer(HELLO_DATA_FIELD, sealed_data);
    if let Some(info) = connection_info {
        message.insert(CONNECTION_INFO_FIELD, Payload::Json(info.clone()));
    }

    let record = build_record(
        RecordType::Hello.name(),
        Some(PROTOCOL_VERSION),
        &message,
        &mut ClearText,
    )
    .map_err(|e| Error::from_wire(e, false))?;

    Ok((record, handshake_key))
}

/// Receiver side: validates an inbound `Hello`, unwraps the handshake key
/// and recovers the initiator's identity. The version gate comes first;
/// after it, any failure to decrypt means the record was not meant for us.
pub(crate) fn accept_hello(
    record: &Record,
    keypair: &KeyPair,
    dec_ivs: &mut IvSequence,
) -> Result<AcceptedHello, Error> {
    match record.identifier.version {
        Some(PROTOCOL_VERSION) => {}
        other => return Err(Error::UnsupportedVersion(other)),
    }

    let wrapped_key = buffer_field(&record.message, HANDSHAKE_KEY_FIELD)?;
    let raw_key = ecies_decrypt(wrapped_key, keypair).map_err(crypto_failed)?;
    let handshake_key = SymmetricKey::from_slice(&raw_key).map_err(crypto_failed)?;

    let sealed_data = buffer_field(&record.message, HELLO_DATA_FIELD)?;
    let iv = dec_ivs.next().map_err(crypto_failed)?;
    let plaintext = crypto::open(&handshake_key, &iv, sealed_data).map_err(crypto_failed)?;
    let hello_data: HelloData =
        serde_json::from_slice(&plaintext).map_err(|e| Error::HandshakeFailed(e.to_string()))?;

    let initiator_public_raw =
        crypto::hex::decode(&hello_data.initiator_public_key).map_err(crypto_failed)?;
    let initiator_public = import_public_key(&initiator_public_raw).map_err(crypto_failed)?;

    let connection_info = record
        .message
        .get(CONNECTION_INFO_FIELD)
        .and_then(Payload::as_json)
        .cloned();

    Ok(AcceptedHello {
        handshake_key,
        initiator_public,
        initiator_public_raw,
        hello_value: hello_data.value,
        connection_info,
    })
}

/// Receiver side: builds the `AuthHello` reply, sealed under the handshake
/// key. Returns the record and the fresh session key both sides adopt.
pub(crate) fn build_auth_hello(
    initiator_public: &PublicKey,
    handshake_key: &SymmetricKey,
    enc_ivs: &mut IvSequence,
) -> Result<(Vec<u8>, SymmetricKey), Error> {
    let session_key = SymmetricKey::generate();
    let wrapped =
        ecies_encrypt(&session_key.as_bytes()[..], initiator_public).map_err(crypto_failed)?;

    let message = Message::new().buffer(SESSION_KEY_FIELD, wrapped);
    let mut sealer = AeadSealer::new(handshake_key, enc_ivs);
    let record = build_record(RecordType::AuthHello.name(), None, &message, &mut sealer)
        .map_err(|e| Error::from_wire(e, false))?;

    Ok((record, session_key))
}

/// Initiator side: recovers the session key from a decrypted `AuthHello`.
pub(crate) fn accept_auth_hello(
    record: &Record,
    keypair: &KeyPair,
) -> Result<SymmetricKey, Error> {
    let wrapped = buffer_field(&record.message, SESSION_KEY_FIELD)?;
    let raw = ecies_decrypt(wrapped, keypair).map_err(crypto_failed)?;
    SymmetricKey::from_slice(&raw).map_err(crypto_failed)
}

fn buffer_field<'a>(message: &'a Message, id: &str) -> Result<&'a [u8], Error> {
    message
        .get(id)
        .and_then(Payload::as_buffer)
        .ok_or_else(|| Error::HandshakeFailed(format!("missing {} buffer", id)))
}

// Every crypto failure during the handshake is a handshake failure, except
// IV exhaustion which keeps its own kind.
fn crypto_failed(e: CryptoError) -> Error {
    Error::from_crypto(e, false)
}
