//! TCP transport; addresses are `host:port` strings.

use std::io;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::debug;
use tokio::net::{TcpListener, TcpStream};

use super::{Binder, Dialer, Listener};

#[derive(Debug, Clone, Copy, Default)]
pub struct Tcp;

impl Dialer for Tcp {
    type Stream = TcpStream;

    fn dial<'a>(&'a self, address: &'a str) -> BoxFuture<'a, io::Result<TcpStream>> {
        async move {
            let stream = TcpStream::connect(address).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        .boxed()
    }
}

impl Binder for Tcp {
    type Listener = TcpAcceptor;

    fn bind<'a>(&'a self, address: &'a str) -> BoxFuture<'a, io::Result<TcpAcceptor>> {
        async move {
            let listener = TcpListener::bind(address).await?;
            Ok(TcpAcceptor { listener })
        }
        .boxed()
    }
}

pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// The bound address; useful after binding port 0.
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

impl Listener for TcpAcceptor {
    type Stream = TcpStream;

    fn accept(&mut self) -> BoxFuture<'_, io::Result<TcpStream>> {
        async move {
            let (stream, remote) = self.listener.accept().await?;
            debug!("accepted connection from {}", remote);
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        .boxed()
    }
}
