use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use crypto::{import_public_key, KeyPair, IV_COUNTER_LIMIT};
use wire::Message;

use crate::error::Error;
use crate::peer::{Command, Peer, ServerPeer};
use crate::session::{RedirectInfo, Session, SessionInfo, Step};
use crate::transport::{Binder, Dialer, Listener};

/// Callbacks for an outgoing session. Invoked from the session's own task;
/// they are expected not to block.
pub trait ClientHandler: Send + Sync + 'static {
    fn on_open(&self, _peer: &Peer) {}
    fn on_message(&self, _peer: &Peer, _message: Message) {}
    fn on_close(&self, _event: CloseEvent) {}
}

/// Callbacks for a listener. One handler serves every connection the
/// listener accepts.
pub trait ServerHandler: Send + Sync + 'static {
    fn on_open(&self, _peer: &ServerPeer, _info: &SessionInfo) {}
    fn on_message(&self, _peer: &ServerPeer, _message: Message) {}
    fn on_close(&self, _error: Option<Error>) {}
}

/// How a client session ended. An orderly remote close carries no error;
/// a redirect carries both the `Redirected` error and where to go, and the
/// engine is already on its way there.
#[derive(Debug)]
pub struct CloseEvent {
    pub error: Option<Error>,
    pub redirect: Option<RedirectInfo>,
}

pub struct ConnectOptions<D, H> {
    pub keypair: KeyPair,
    pub transport: D,
    /// Opaque; forwarded to the transport.
    pub address: String,
    /// The expected peer identity: its public key in raw uncompressed form.
    pub remote_public_key: Vec<u8>,
    /// Delivered to the receiver inside the sealed part of the handshake.
    pub hello_value: Option<Value>,
    /// Travels in the clear; visible to anyone watching the wire.
    pub connection_info: Option<Value>,
    pub handler: H,
    /// Bound on each IV counter. The default is the protocol's safe bound;
    /// a reduced bound makes exhaustion behaviour testable.
    pub iv_limit: u64,
}

impl<D, H> ConnectOptions<D, H> {
    pub fn new(
        keypair: KeyPair,
        transport: D,
        address: impl Into<String>,
        remote_public_key: Vec<u8>,
        handler: H,
    ) -> Self {
        ConnectOptions {
            keypair,
            transport,
            address: address.into(),
            remote_public_key,
            hello_value: None,
            connection_info: None,
            handler,
            iv_limit: IV_COUNTER_LIMIT,
        }
    }
}

pub struct ListenOptions<B, H> {
    pub keypair: KeyPair,
    pub transport: B,
    pub address: String,
    pub handler: H,
    pub iv_limit: u64,
}

impl<B, H> ListenOptions<B, H> {
    pub fn new(keypair: KeyPair, transport: B, address: impl Into<String>, handler: H) -> Self {
        ListenOptions {
            keypair,
            transport,
            address: address.into(),
            handler,
            iv_limit: IV_COUNTER_LIMIT,
        }
    }
}

/// Establishes an outgoing session and drives it (and any sessions a
/// redirect leads to) on a background task. Must be called from within a
/// tokio runtime. Dropping the returned handle leaves the session running.
pub fn connect<D, H>(options: ConnectOptions<D, H>) -> Connector
where
    D: Dialer,
    H: ClientHandler,
{
    let cancelled = Arc::new(AtomicBool::new(false));
    let (close_tx, close_rx) = mpsc::unbounded_channel();
    let connector = Connector {
        cancelled: cancelled.clone(),
        closer: close_tx,
    };
    tokio::spawn(run_client(options, close_rx, cancelled));
    connector
}

/// Binds a listener and serves inbound sessions on background tasks.
/// Must be called from within a tokio runtime.
pub fn listen<B, H>(options: ListenOptions<B, H>) -> ListenerHandle
where
    B: Binder,
    H: ServerHandler,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(run_server(options, stop_rx));
    ListenerHandle { stop: stop_tx }
}

/// Close handle for an outgoing session.
pub struct Connector {
    cancelled: Arc<AtomicBool>,
    closer: mpsc::UnboundedSender<Option<String>>,
}

impl Connector {
    /// Cancels the pending handshake or closes the open session. After
    /// this returns, none of the caller's handlers fire again.
    pub fn close(&self, reason: Option<String>) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.closer.send(reason);
    }
}

/// Stop handle for a listener.
pub struct ListenerHandle {
    stop: watch::Sender<bool>,
}

impl ListenerHandle {
    /// Stops accepting and silently tears down the listener's live
    /// sessions.
    pub fn stop(&self, reason: Option<String>) {
        if let Some(reason) = reason {
            info!("listener stopping: {}", reason);
        }
        let _ = self.stop.send(true);
    }
}

enum SessionEnd {
    Orderly,
    Local,
    Redirect(RedirectInfo),
    Failed(Error),
}

// Session-task-side view of the caller's handler, with the suppression
// rule applied: nothing fires after a local cancel or a listener stop.
trait Callbacks: Send + Sync {
    fn opened(&self, commands: &mpsc::UnboundedSender<Command>, info: SessionInfo);
    fn deliver(&self, commands: &mpsc::UnboundedSender<Command>, message: Message);
}

struct ClientCallbacks<H> {
    handler: Arc<H>,
    cancelled: Arc<AtomicBool>,
}

impl<H: ClientHandler> Callbacks for ClientCallbacks<H> {
    fn opened(&self, commands: &mpsc::UnboundedSender<Command>, _info: SessionInfo) {
        if !self.cancelled.load(Ordering::SeqCst) {
            self.handler.on_open(&Peer::new(commands.clone()));
        }
    }

    fn deliver(&self, commands: &mpsc::UnboundedSender<Command>, message: Message) {
        if !self.cancelled.load(Ordering::SeqCst) {
            self.handler.on_message(&Peer::new(commands.clone()), message);
        }
    }
}

struct ServerCallbacks<H> {
    handler: Arc<H>,
    stop: watch::Receiver<bool>,
}

impl<H: ServerHandler> Callbacks for ServerCallbacks<H> {
    fn opened(&self, commands: &mpsc::UnboundedSender<Command>, info: SessionInfo) {
        if !*self.stop.borrow() {
            self.handler.on_open(&ServerPeer::new(commands.clone()), &info);
        }
    }

    fn deliver(&self, commands: &mpsc::UnboundedSender<Command>, message: Message) {
        if !*self.stop.borrow() {
            self.handler.on_message(&ServerPeer::new(commands.clone()), message);
        }
    }
}

async fn run_client<D, H>(
    options: ConnectOptions<D, H>,
    mut close_rx: mpsc::UnboundedReceiver<Option<String>>,
    cancelled: Arc<AtomicBool>,
) where
    D: Dialer,
    H: ClientHandler,
{
    let ConnectOptions {
        keypair,
        transport,
        mut address,
        remote_public_key,
        hello_value,
        mut connection_info,
        handler,
        iv_limit,
    } = options;
    let keypair = Arc::new(keypair);
    let handler = Arc::new(handler);
    let callbacks = ClientCallbacks {
        handler: handler.clone(),
        cancelled: cancelled.clone(),
    };
    let mut remote_raw = remote_public_key;

    loop {
        let remote_public = match import_public_key(&remote_raw) {
            Ok(key) => key,
            Err(e) => {
                close_client(
                    &cancelled,
                    handler.as_ref(),
                    CloseEvent {
                        error: Some(Error::HandshakeFailed(e.to_string())),
                        redirect: None,
                    },
                );
                return;
            }
        };

        debug!("connecting to {}", address);
        let stream = tokio::select! {
            _ = recv_close(&mut close_rx) => return,
            dialed = transport.dial(&address) => match dialed {
                Ok(stream) => stream,
                Err(e) => {
                    close_client(
                        &cancelled,
                        handler.as_ref(),
                        CloseEvent {
                            error: Some(Error::TransportFailed(e.to_string())),
                            redirect: None,
                        },
                    );
                    return;
                }
            }
        };

        let session = Session::initiator(
            keypair.clone(),
            remote_public,
            hello_value.clone(),
            connection_info.clone(),
            iv_limit,
        );
        let end = drive(
            stream,
            session,
            Shutdown::Commanded(&mut close_rx),
            &callbacks,
        )
        .await;

        match end {
            SessionEnd::Redirect(info) => {
                debug!("redirected to {}", info.address);
                close_client(
                    &cancelled,
                    handler.as_ref(),
                    CloseEvent {
                        error: Some(Error::Redirected),
                        redirect: Some(info.clone()),
                    },
                );
                if cancelled.load(Ordering::SeqCst) {
                    return;
                }
                address = info.address;
                remote_raw = info.public_key;
                connection_info = info.context;
            }
            SessionEnd::Orderly => {
                close_client(
                    &cancelled,
                    handler.as_ref(),
                    CloseEvent {
                        error: None,
                        redirect: None,
                    },
                );
                return;
            }
            SessionEnd::Local => return,
            SessionEnd::Failed(error) => {
                close_client(
                    &cancelled,
                    handler.as_ref(),
                    CloseEvent {
                        error: Some(error),
                        redirect: None,
                    },
                );
                return;
            }
        }
    }
}

fn close_client<H: ClientHandler>(cancelled: &AtomicBool, handler: &H, event: CloseEvent) {
    if !cancelled.load(Ordering::SeqCst) {
        handler.on_close(event);
    }
}

async fn run_server<B, H>(options: ListenOptions<B, H>, stop_rx: watch::Receiver<bool>)
where
    B: Binder,
    H: ServerHandler,
{
    let ListenOptions {
        keypair,
        transport,
        address,
        handler,
        iv_limit,
    } = options;
    let keypair = Arc::new(keypair);
    let handler = Arc::new(handler);

    let mut listener = match transport.bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            handler.on_close(Some(Error::TransportFailed(e.to_string())));
            return;
        }
    };
    info!("listening at {}", address);

    let mut stop_watch = stop_rx.clone();
    loop {
        tokio::select! {
            _ = stopped(&mut stop_watch) => {
                info!("listener at {} stopped", address);
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    let keypair = keypair.clone();
                    let callbacks = ServerCallbacks {
                        handler: handler.clone(),
                        stop: stop_rx.clone(),
                    };
                    let mut session_stop = stop_rx.clone();
                    tokio::spawn(async move {
                        let session = Session::receiver(keypair, iv_limit);
                        let end = drive(
                            stream,
                            session,
                            Shutdown::Watched(&mut session_stop),
                            &callbacks,
                        )
                        .await;
                        let stopped_now = *callbacks.stop.borrow();
                        match end {
                            SessionEnd::Orderly => {
                                if !stopped_now {
                                    callbacks.handler.on_close(None);
                                }
                            }
                            SessionEnd::Failed(error) => {
                                if !stopped_now {
                                    callbacks.handler.on_close(Some(error));
                                }
                            }
                            SessionEnd::Local | SessionEnd::Redirect(_) => {}
                        }
                    });
                }
                Err(e) => {
                    handler.on_close(Some(Error::TransportFailed(e.to_string())));
                    return;
                }
            }
        }
    }
}

enum Shutdown<'a> {
    Commanded(&'a mut mpsc::UnboundedReceiver<Option<String>>),
    Watched(&'a mut watch::Receiver<bool>),
}

impl Shutdown<'_> {
    async fn wait(&mut self) -> Option<String> {
        match self {
            Shutdown::Commanded(rx) => recv_close(&mut **rx).await,
            Shutdown::Watched(rx) => {
                stopped(&mut **rx).await;
                None
            }
        }
    }
}

// Resolves with the close reason; pends forever once the handle is gone
// (a dropped handle is not a close).
async fn recv_close(rx: &mut mpsc::UnboundedReceiver<Option<String>>) -> Option<String> {
    match rx.recv().await {
        Some(reason) => reason,
        None => std::future::pending().await,
    }
}

async fn stopped(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// The per-connection event loop: one task owns the session, its transport
/// stream and its command queue, so all state mutation happens in one
/// place and outgoing records hit the wire strictly in submission order.
async fn drive<S, C>(
    mut stream: S,
    mut session: Session,
    mut shutdown: Shutdown<'_>,
    callbacks: &C,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
    C: Callbacks,
{
    let (command_tx, mut command_rx) = mpsc::unbounded_channel();

    match session.start() {
        Ok(steps) => {
            if let Err(end) =
                apply_steps(steps, &mut stream, &mut session, &command_tx, callbacks).await
            {
                return end;
            }
        }
        Err(error) => {
            session.fail_pending(&error);
            session.close();
            return SessionEnd::Failed(error);
        }
    }

    let mut chunk = vec![0; 8192];
    loop {
        tokio::select! {
            reason = shutdown.wait() => {
                session.fail_pending(&Error::LocalClose(reason));
                session.close();
                return SessionEnd::Local;
            }
            command = command_rx.recv() => {
                // `command_tx` lives in this scope, so the queue never closes.
                if let Some(command) = command {
                    if let Some(end) = handle_command(command, &mut stream, &mut session).await {
                        return end;
                    }
                }
            }
            read = stream.read(&mut chunk) => match read {
                Ok(0) => {
                    return if session.is_open() {
                        session.fail_pending(&Error::Closed);
                        session.close();
                        SessionEnd::Orderly
                    } else {
                        let error = Error::HandshakeFailed(
                            "transport closed during handshake".to_owned(),
                        );
                        session.fail_pending(&error);
                        session.close();
                        SessionEnd::Failed(error)
                    };
                }
                Ok(n) => match session.accept_bytes(&chunk[..n]) {
                    Ok(steps) => {
                        if let Err(end) =
                            apply_steps(steps, &mut stream, &mut session, &command_tx, callbacks)
                                .await
                        {
                            return end;
                        }
                    }
                    Err(error) => {
                        session.fail_pending(&error);
                        session.close();
                        return SessionEnd::Failed(error);
                    }
                },
                Err(e) => {
                    let error = Error::TransportFailed(e.to_string());
                    session.fail_pending(&error);
                    session.close();
                    return SessionEnd::Failed(error);
                }
            }
        }
    }
}

async fn apply_steps<S, C>(
    steps: Vec<Step>,
    stream: &mut S,
    session: &mut Session,
    commands: &mpsc::UnboundedSender<Command>,
    callbacks: &C,
) -> Result<(), SessionEnd>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
    C: Callbacks,
{
    for step in steps {
        match step {
            Step::Transmit(bytes) => {
                if let Err(e) = stream.write_all(&bytes).await {
                    let error = Error::TransportFailed(e.to_string());
                    session.fail_pending(&error);
                    session.close();
                    return Err(SessionEnd::Failed(error));
                }
            }
            Step::Opened(info) => callbacks.opened(commands, info),
            Step::Deliver(message) => callbacks.deliver(commands, message),
            Step::Redirect(info) => {
                session.fail_pending(&Error::Redirected);
                session.close();
                return Err(SessionEnd::Redirect(info));
            }
        }
    }
    Ok(())
}

async fn handle_command<S>(
    command: Command,
    stream: &mut S,
    session: &mut Session,
) -> Option<SessionEnd>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    match command {
        Command::Send { message, waiter } => {
            if !session.is_open() {
                let _ = waiter.send(Err(Error::Closed));
                return None;
            }
            match session.encode_send(&message) {
                Ok(bytes) => {
                    session.push_ack(waiter);
                    transmit(stream, session, &bytes).await
                }
                // An oversized identifier fails this send alone.
                Err(error @ Error::IdentifierTooBig(_)) => {
                    let _ = waiter.send(Err(error));
                    None
                }
                Err(error) => {
                    let _ = waiter.send(Err(error.clone()));
                    session.fail_pending(&error);
                    session.close();
                    Some(SessionEnd::Failed(error))
                }
            }
        }
        Command::StatusSend { message } => {
            if !session.is_open() {
                return None;
            }
            match session.encode_status_send(&message) {
                Ok(bytes) => transmit(stream, session, &bytes).await,
                Err(Error::IdentifierTooBig(len)) => {
                    warn!("status send dropped: identifier of {} bytes", len);
                    None
                }
                Err(error) => {
                    session.fail_pending(&error);
                    session.close();
                    Some(SessionEnd::Failed(error))
                }
            }
        }
        Command::Redirect { info } => {
            if !session.is_open() {
                return None;
            }
            match session.encode_redirect(&info) {
                Ok(bytes) => transmit(stream, session, &bytes).await,
                Err(Error::IdentifierTooBig(len)) => {
                    warn!("redirect dropped: identifier of {} bytes", len);
                    None
                }
                Err(error) => {
                    session.fail_pending(&error);
                    session.close();
                    Some(SessionEnd::Failed(error))
                }
            }
        }
        Command::Close { reason } => {
            session.fail_pending(&Error::LocalClose(reason));
            session.close();
            Some(SessionEnd::Local)
        }
    }
}

async fn transmit<S>(stream: &mut S, session: &mut Session, bytes: &[u8]) -> Option<SessionEnd>
where
    S: AsyncWrite + Send + Unpin,
{
    match stream.write_all(bytes).await {
        Ok(()) => None,
        Err(e) => {
            let error = Error::TransportFailed(e.to_string());
            session.fail_pending(&error);
            session.close();
            Some(SessionEnd::Failed(error))
        }
    }
}
