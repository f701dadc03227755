use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, trace};
use serde_json::Value;
use tokio::sync::oneshot;

use crypto::{import_public_key, Direction, IvSequence, KeyPair, PublicKey, SymmetricKey};
use wire::{build_record, AeadOpener, AeadSealer, ClearText, Message, Payload, Record, RecordReader};

use crate::error::Error;
use crate::handshake;
use crate::record_type::RecordType;

const ADDRESS_FIELD: &str = "address";
const PUBLIC_KEY_FIELD: &str = "publicKey";
const PERMANENT_FIELD: &str = "permanent";
const REDIRECT_CONTEXT_FIELD: &str = "redirectContext";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Initiator,
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingHello,
    AwaitingAuthHello,
    Open,
    Closed,
}

/// What a consumer learned by the time its handshake completed. Receivers
/// fill every field from the `Hello` record; initiators already knew the
/// peer and carry nothing else.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// The peer's static public key, raw uncompressed form.
    pub peer_public_key: Vec<u8>,
    pub hello_value: Option<Value>,
    pub connection_info: Option<Value>,
}

/// Where a `Redirect` record points.
#[derive(Debug, Clone)]
pub struct RedirectInfo {
    pub address: String,
    /// The successor peer's static public key, raw uncompressed form.
    pub public_key: Vec<u8>,
    /// Whether the caller should durably update its directory.
    pub permanent: bool,
    /// Forwarded to the successor connection as its `connection_info`.
    pub context: Option<Value>,
}

/// Consumer output, in commit order. `Transmit` bytes must reach the
/// transport before any later step is acted on.
#[derive(Debug)]
pub(crate) enum Step {
    Transmit(Vec<u8>),
    Opened(SessionInfo),
    Deliver(Message),
    Redirect(RedirectInfo),
}

/// The per-connection protocol state machine. One instance per transport
/// connection, touched only by that connection's task: bytes in through
/// `accept_bytes`, records out through the `encode_*` methods, with the
/// driver committing every `Transmit` to the wire in step order.
pub(crate) struct Session {
    role: Role,
    phase: Phase,
    keypair: Arc<KeyPair>,
    remote_public: Option<PublicKey>,
    handshake_key: Option<SymmetricKey>,
    session_key: Option<SymmetricKey>,
    enc_ivs: IvSequence,
    dec_ivs: IvSequence,
    reader: RecordReader,
    pending_acks: VecDeque<oneshot::Sender<Result<(), Error>>>,
    hello_value: Option<Value>,
    connection_info: Option<Value>,
}

impl Session {
    pub fn initiator(
        keypair: Arc<KeyPair>,
        remote_public: PublicKey,
        hello_value: Option<Value>,
        connection_info: Option<Value>,
        iv_limit: u64,
    ) -> Self {
        Session {
            role: Role::Initiator,
            phase: Phase::AwaitingAuthHello,
            keypair,
            remote_public: Some(remote_public),
            handshake_key: None,
            session_key: None,
            enc_ivs: IvSequence::with_limit(Direction::Initiator, iv_limit),
            dec_ivs: IvSequence::with_limit(Direction::Receiver, iv_limit),
            reader: RecordReader::new(),
            pending_acks: VecDeque::new(),
            hello_value,
            connection_info,
        }
    }

    pub fn receiver(keypair: Arc<KeyPair>, iv_limit: u64) -> Self {
        Session {
            role: Role::Receiver,
            phase: Phase::AwaitingHello,
            keypair,
            remote_public: None,
            handshake_key: None,
            session_key: None,
            enc_ivs: IvSequence::with_limit(Direction::Receiver, iv_limit),
            dec_ivs: IvSequence::with_limit(Direction::Initiator, iv_limit),
            reader: RecordReader::new(),
            pending_acks: VecDeque::new(),
            hello_value: None,
            connection_info: None,
        }
    }

    /// First move once the transport is up: the initiator opens with
    /// `Hello`, a receiver has nothing to say yet.
    pub fn start(&mut self) -> Result<Vec<Step>, Error> {
        match self.role {
            Role::Receiver => Ok(Vec::new()),
            Role::Initiator => {
                let remote = self
                    .remote_public
                    .as_ref()
                    .ok_or_else(|| Error::HandshakeFailed("no remote identity".to_owned()))?;
                let (record, handshake_key) = handshake::build_hello(
                    &self.keypair,
                    remote,
                    self.hello_value.as_ref(),
                    self.connection_info.as_ref(),
                    &mut self.enc_ivs,
                )?;
                self.handshake_key = Some(handshake_key);
                Ok(vec![Step::Transmit(record)])
            }
        }
    }

    /// Feeds a transport chunk through the parse state machine, producing
    /// the steps the driver must act on, in order. Any error is fatal to
    /// the session.
    pub fn accept_bytes(&mut self, chunk: &[u8]) -> Result<Vec<Step>, Error> {
        self.reader.extend(chunk);
        let mut steps = Vec::new();
        loop {
            let record = match self.next_record()? {
                Some(record) => record,
                None => break,
            };
            if !self.handle_record(record, &mut steps)? {
                break;
            }
        }
        Ok(steps)
    }

    pub fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    /// Seals a `Send` record. The caller parks the acknowledgement waiter
    /// with `push_ack` once the record is committed to the queue.
    pub fn encode_send(&mut self, message: &Message) -> Result<Vec<u8>, Error> {
        self.encode(RecordType::Send, message)
    }

    pub fn encode_status_send(&mut self, message: &Message) -> Result<Vec<u8>, Error> {
        self.encode(RecordType::StatusSend, message)
    }

    pub fn encode_redirect(&mut self, info: &RedirectInfo) -> Result<Vec<u8>, Error> {
        let mut message = Message::new()
            .json(ADDRESS_FIELD, Value::String(info.address.clone()))
            .json(
                PUBLIC_KEY_FIELD,
                Value::String(crypto::hex::encode(&info.public_key)),
            )
            .json(PERMANENT_FIELD, Value::Bool(info.permanent));
        if let Some(context) = &info.context {
            message.insert(REDIRECT_CONTEXT_FIELD, Payload::Json(context.clone()));
        }
        self.encode(RecordType::Redirect, &message)
    }

    /// Parks a waiter for the next unmatched `Acknowledge`. Waiters resolve
    /// strictly oldest-first.
    pub fn push_ack(&mut self, waiter: oneshot::Sender<Result<(), Error>>) {
        self.pending_acks.push_back(waiter);
    }

    /// Rejects every parked waiter with the session's teardown reason.
    pub fn fail_pending(&mut self, error: &Error) {
        for waiter in self.pending_acks.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    /// Enters the terminal phase. Idempotent; a closed session neither
    /// parses nor seals anything further.
    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }

    // Seals a record of an arbitrary type name, bypassing the closed set.
    #[cfg(test)]
    pub fn encode_raw(&mut self, kind: &str, message: &Message) -> Result<Vec<u8>, Error> {
        let key = self.session_key.as_ref().unwrap();
        let mut sealer = AeadSealer::new(key, &mut self.enc_ivs);
        build_record(kind, None, message, &mut sealer).map_err(|e| Error::from_wire(e, true))
    }

    fn encode(&mut self, kind: RecordType, message: &Message) -> Result<Vec<u8>, Error> {
        if self.phase != Phase::Open {
            return Err(Error::Closed);
        }
        let key = self
            .session_key
            .as_ref()
            .ok_or_else(|| Error::ProtocolViolation("no session key".to_owned()))?;
        let mut sealer = AeadSealer::new(key, &mut self.enc_ivs);
        build_record(kind.name(), None, message, &mut sealer)
            .map_err(|e| Error::from_wire(e, true))
    }

    fn next_record(&mut self) -> Result<Option<Record>, Error> {
        let open = self.phase == Phase::Open;
        let result = match self.phase {
            Phase::Closed => return Ok(None),
            Phase::AwaitingHello => self.reader.next_record(&mut ClearText),
            Phase::AwaitingAuthHello => {
                let key = self.handshake_key.as_ref().ok_or_else(|| {
                    Error::HandshakeFailed("no handshake key yet".to_owned())
                })?;
                let mut opener = AeadOpener::new(key, &mut self.dec_ivs);
                self.reader.next_record(&mut opener)
            }
            Phase::Open => {
                let key = self
                    .session_key
                    .as_ref()
                    .ok_or_else(|| Error::ProtocolViolation("no session key".to_owned()))?;
                let mut opener = AeadOpener::new(key, &mut self.dec_ivs);
                self.reader.next_record(&mut opener)
            }
        };
        result.map_err(|e| Error::from_wire(e, open))
    }

    // Returns false once the session has nothing further to parse on this
    // connection (it was redirected away).
    fn handle_record(&mut self, record: Record, steps: &mut Vec<Step>) -> Result<bool, Error> {
        let kind = RecordType::from_name(&record.identifier.kind)
            .ok_or_else(|| self.unexpected(&record.identifier.kind))?;
        trace!("{:?} record in phase {:?}", kind, self.phase);

        match (self.phase, kind) {
            (Phase::AwaitingHello, RecordType::Hello) => {
                let accepted =
                    handshake::accept_hello(&record, &self.keypair, &mut self.dec_ivs)?;
                let (reply, session_key) = handshake::build_auth_hello(
                    &accepted.initiator_public,
                    &accepted.handshake_key,
                    &mut self.enc_ivs,
                )?;
                self.remote_public = Some(accepted.initiator_public);
                // The handshake key is never used again; dropping the
                // handle zeroises it.
                self.handshake_key = None;
                self.session_key = Some(session_key);
                self.phase = Phase::Open;
                debug!("handshake complete (receiver side)");

                steps.push(Step::Transmit(reply));
                steps.push(Step::Opened(SessionInfo {
                    peer_public_key: accepted.initiator_public_raw,
                    hello_value: accepted.hello_value,
                    connection_info: accepted.connection_info,
                }));
                Ok(true)
            }
            (Phase::AwaitingAuthHello, RecordType::AuthHello) => {
                let session_key = handshake::accept_auth_hello(&record, &self.keypair)?;
                self.handshake_key = None;
                self.session_key = Some(session_key);
                self.phase = Phase::Open;
                debug!("handshake complete (initiator side)");

                let peer_public_key = self
                    .remote_public
                    .as_ref()
                    .map(|key| crypto::export_public_key(key).to_vec())
                    .unwrap_or_default();
                steps.push(Step::Opened(SessionInfo {
                    peer_public_key,
                    hello_value: None,
                    connection_info: None,
                }));
                Ok(true)
            }
            (Phase::Open, RecordType::StatusSend) => {
                steps.push(Step::Deliver(record.message));
                Ok(true)
            }
            (Phase::Open, RecordType::Send) => {
                // The acknowledgement is committed ahead of delivery so a
                // reply sent from the message callback cannot overtake it.
                let ack = self.encode(RecordType::Acknowledge, &Message::new())?;
                steps.push(Step::Transmit(ack));
                steps.push(Step::Deliver(record.message));
                Ok(true)
            }
            (Phase::Open, RecordType::Acknowledge) => {
                let waiter = self.pending_acks.pop_front().ok_or_else(|| {
                    Error::ProtocolViolation(
                        "acknowledgement with no send outstanding".to_owned(),
                    )
                })?;
                let _ = waiter.send(Ok(()));
                Ok(true)
            }
            (Phase::Open, RecordType::Redirect) => {
                if self.role == Role::Receiver {
                    return Err(Error::ProtocolViolation(
                        "redirect sent to a listening peer".to_owned(),
                    ));
                }
                let info = parse_redirect(&record.message)?;
                steps.push(Step::Redirect(info));
                Ok(false)
            }
            _ => Err(self.unexpected(kind.name())),
        }
    }

    fn unexpected(&self, kind: &str) -> Error {
        if self.phase == Phase::Open {
            Error::ProtocolViolation(format!("unexpected {} record", kind))
        } else {
            Error::HandshakeFailed(format!("unexpected {} record during handshake", kind))
        }
    }
}

fn parse_redirect(message: &Message) -> Result<RedirectInfo, Error> {
    let address = json_string(message, ADDRESS_FIELD)?;
    let public_key_hex = json_string(message, PUBLIC_KEY_FIELD)?;
    let public_key = crypto::hex::decode(&public_key_hex)
        .map_err(|_| Error::ProtocolViolation("redirect public key is not hex".to_owned()))?;
    import_public_key(&public_key).map_err(|_| {
        Error::ProtocolViolation("redirect public key is not a valid point".to_owned())
    })?;

    let permanent = message
        .get(PERMANENT_FIELD)
        .and_then(Payload::as_json)
        .and_then(Value::as_bool)
        .ok_or_else(|| {
            Error::ProtocolViolation("redirect without a permanent flag".to_owned())
        })?;

    let context = message
        .get(REDIRECT_CONTEXT_FIELD)
        .and_then(Payload::as_json)
        .cloned();

    Ok(RedirectInfo {
        address,
        public_key,
        permanent,
        context,
    })
}

fn json_string(message: &Message, id: &str) -> Result<String, Error> {
    message
        .get(id)
        .and_then(Payload::as_json)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::ProtocolViolation(format!("redirect without {}", id)))
}
