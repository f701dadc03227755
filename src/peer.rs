use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use wire::Message;

use crate::error::Error;
use crate::session::RedirectInfo;

pub(crate) enum Command {
    Send {
        message: Message,
        waiter: oneshot::Sender<Result<(), Error>>,
    },
    StatusSend {
        message: Message,
    },
    Redirect {
        info: RedirectInfo,
    },
    Close {
        reason: Option<String>,
    },
}

/// Handle to one live connection. Cloneable; every clone addresses the
/// same session. All operations queue behind the session's single outgoing
/// queue, so records reach the wire in the order they were submitted.
#[derive(Clone)]
pub struct Peer {
    commands: mpsc::UnboundedSender<Command>,
}

impl Peer {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        Peer { commands }
    }

    /// Sends `message` and returns a receipt that resolves once the peer
    /// acknowledges it. Receipts resolve in send order. A rejected receipt
    /// carries the session's teardown reason; it does **not** imply the
    /// message never arrived, only that no acknowledgement will.
    pub fn send(&self, message: Message) -> SendReceipt {
        let (waiter, receipt) = oneshot::channel();
        if let Err(mpsc::error::SendError(command)) =
            self.commands.send(Command::Send { message, waiter })
        {
            if let Command::Send { waiter, .. } = command {
                let _ = waiter.send(Err(Error::Closed));
            }
        }
        SendReceipt { receipt }
    }

    /// Fire-and-forget send: the peer delivers the message but owes no
    /// acknowledgement, and no outcome is reported here.
    pub fn status_send(&self, message: Message) {
        let _ = self.commands.send(Command::StatusSend { message });
    }

    /// Closes the session. The reason stays local; the peer observes an
    /// orderly transport close.
    pub fn close(&self, reason: Option<String>) {
        let _ = self.commands.send(Command::Close { reason });
    }
}

/// Resolution of one acknowledged send.
pub struct SendReceipt {
    receipt: oneshot::Receiver<Result<(), Error>>,
}

impl SendReceipt {
    /// Waits for the matching `Acknowledge`, or for the session to go away.
    pub async fn wait(self) -> Result<(), Error> {
        match self.receipt.await {
            Ok(result) => result,
            Err(_) => Err(Error::Closed),
        }
    }
}

/// Listener-side handle: everything `Peer` offers, plus one-way
/// redirection of the remote initiator.
#[derive(Clone)]
pub struct ServerPeer {
    peer: Peer,
}

impl ServerPeer {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        ServerPeer {
            peer: Peer::new(commands),
        }
    }

    /// Points the initiator at another peer. The initiator closes this
    /// connection and re-initiates against `(address, public_key)`,
    /// presenting `context` as the successor's connection info. The
    /// protocol does not let the initiator decline.
    pub fn redirect(
        &self,
        address: &str,
        public_key: &[u8],
        permanent: bool,
        context: Option<Value>,
    ) {
        let _ = self.peer.commands.send(Command::Redirect {
            info: RedirectInfo {
                address: address.to_owned(),
                public_key: public_key.to_vec(),
                permanent,
                context,
            },
        });
    }
}

impl std::ops::Deref for ServerPeer {
    type Target = Peer;

    fn deref(&self) -> &Peer {
        &self.peer
    }
}
