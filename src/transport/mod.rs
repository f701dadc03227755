//! Transport abstraction: any reliable, ordered byte stream will do. The
//! engine never frames at this level; chunks arrive opaque and records are
//! teased out of the stream above.

use std::io;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod memory;
pub mod tcp;

/// Opens outgoing streams. Addresses are opaque strings the engine only
/// forwards.
pub trait Dialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn dial<'a>(&'a self, address: &'a str) -> BoxFuture<'a, io::Result<Self::Stream>>;
}

/// Accepts inbound streams at a bound address.
pub trait Listener: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn accept(&mut self) -> BoxFuture<'_, io::Result<Self::Stream>>;
}

/// Binds listeners.
pub trait Binder: Send + Sync + 'static {
    type Listener: Listener;

    fn bind<'a>(&'a self, address: &'a str) -> BoxFuture<'a, io::Result<Self::Listener>>;
}
