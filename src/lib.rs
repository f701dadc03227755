#![forbid(unsafe_code)]

//! Seif protocol version 0: mutually authenticated sessions over any
//! reliable, ordered byte stream, exchanging framed records encrypted with
//! a per-session AES-256-GCM key.

mod engine;
mod error;
mod handshake;
mod peer;
mod record_type;
mod session;

pub mod store;
pub mod transport;

pub use self::engine::{
    connect, listen, ClientHandler, CloseEvent, ConnectOptions, Connector, ListenOptions,
    ListenerHandle, ServerHandler,
};
pub use self::error::Error;
pub use self::peer::{Peer, SendReceipt, ServerPeer};
pub use self::session::{RedirectInfo, SessionInfo};

pub use crypto::{KeyPair, IV_COUNTER_LIMIT};
pub use wire::{Message, Payload};

#[cfg(test)]
mod test_consumer;

#[cfg(test)]
mod test_end_to_end;
