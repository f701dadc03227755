//! In-process transport over paired duplex pipes. Listeners register under
//! a name on a shared hub and dialers reach them by that name; the role TCP
//! plays in production, without sockets.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use super::{Binder, Dialer, Listener};

const PIPE_CAPACITY: usize = 64 * 1024;

type Registry = HashMap<String, mpsc::UnboundedSender<DuplexStream>>;

#[derive(Clone, Default)]
pub struct MemoryHub {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Dialer for MemoryHub {
    type Stream = DuplexStream;

    fn dial<'a>(&'a self, address: &'a str) -> BoxFuture<'a, io::Result<DuplexStream>> {
        let result = (|| {
            let registry = self.registry.lock().unwrap();
            let acceptor = registry.get(address).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("no listener at {}", address),
                )
            })?;
            let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
            acceptor.send(remote).map_err(|_| {
                io::Error::new(io::ErrorKind::ConnectionRefused, "listener stopped")
            })?;
            Ok(local)
        })();
        async move { result }.boxed()
    }
}

impl Binder for MemoryHub {
    type Listener = MemoryListener;

    fn bind<'a>(&'a self, address: &'a str) -> BoxFuture<'a, io::Result<MemoryListener>> {
        let (sender, incoming) = mpsc::unbounded_channel();
        self.registry
            .lock()
            .unwrap()
            .insert(address.to_owned(), sender);
        async move { Ok(MemoryListener { incoming }) }.boxed()
    }
}

pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

impl Listener for MemoryListener {
    type Stream = DuplexStream;

    fn accept(&mut self) -> BoxFuture<'_, io::Result<DuplexStream>> {
        async move {
            self.incoming
                .recv()
                .await
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "hub shut down"))
        }
        .boxed()
    }
}
