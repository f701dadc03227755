use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crypto::KeyPair;
use wire::Message;

use crate::engine::{
    connect, listen, ClientHandler, CloseEvent, ConnectOptions, ListenOptions, ServerHandler,
};
use crate::error::Error;
use crate::peer::{Peer, ServerPeer};
use crate::session::SessionInfo;
use crate::transport::memory::MemoryHub;

const TICK: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

enum ClientEvent {
    Open(Peer),
    Message(Message),
    Close(CloseEvent),
}

struct ClientProbe {
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientProbe {
    fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, feed) = mpsc::unbounded_channel();
        (ClientProbe { events }, feed)
    }
}

impl ClientHandler for ClientProbe {
    fn on_open(&self, peer: &Peer) {
        let _ = self.events.send(ClientEvent::Open(peer.clone()));
    }

    fn on_message(&self, _peer: &Peer, message: Message) {
        let _ = self.events.send(ClientEvent::Message(message));
    }

    fn on_close(&self, event: CloseEvent) {
        let _ = self.events.send(ClientEvent::Close(event));
    }
}

enum ServerEvent {
    Open(ServerPeer, SessionInfo),
    Message(ServerPeer, Message),
    Close(Option<Error>),
}

struct ServerProbe {
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl ServerProbe {
    fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (events, feed) = mpsc::unbounded_channel();
        (ServerProbe { events }, feed)
    }
}

impl ServerHandler for ServerProbe {
    fn on_open(&self, peer: &ServerPeer, info: &SessionInfo) {
        let _ = self.events.send(ServerEvent::Open(peer.clone(), info.clone()));
    }

    fn on_message(&self, peer: &ServerPeer, message: Message) {
        let _ = self.events.send(ServerEvent::Message(peer.clone(), message));
    }

    fn on_close(&self, error: Option<Error>) {
        let _ = self.events.send(ServerEvent::Close(error));
    }
}

async fn next_client(feed: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    timeout(TICK, feed.recv())
        .await
        .expect("timed out waiting for a client event")
        .expect("client probe went away")
}

async fn next_server(feed: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
    timeout(TICK, feed.recv())
        .await
        .expect("timed out waiting for a server event")
        .expect("server probe went away")
}

fn client_open(event: ClientEvent) -> Peer {
    match event {
        ClientEvent::Open(peer) => peer,
        ClientEvent::Message(_) => panic!("expected open, got a message"),
        ClientEvent::Close(event) => panic!("expected open, got close: {:?}", event),
    }
}

fn server_open(event: ServerEvent) -> (ServerPeer, SessionInfo) {
    match event {
        ServerEvent::Open(peer, info) => (peer, info),
        ServerEvent::Message(..) => panic!("expected open, got a message"),
        ServerEvent::Close(error) => panic!("expected open, got close: {:?}", error),
    }
}

// Spawned listener tasks register with the hub on their first poll; one
// yield lets that happen before anyone dials.
async fn settle() {
    tokio::task::yield_now().await;
}

// Nothing may arrive on `feed`: neither an event within the grace period
// nor anything already queued. A probe whose engine task has ended closes
// the channel, which is also quiet.
async fn assert_quiet<T>(feed: &mut mpsc::UnboundedReceiver<T>) {
    match timeout(Duration::from_millis(200), feed.recv()).await {
        Err(_) | Ok(None) => {}
        Ok(Some(_)) => panic!("an event fired after the close"),
    }
}

#[tokio::test]
async fn basic_echo() {
    init_logging();
    let hub = MemoryHub::new();

    let server_keys = KeyPair::generate();
    let server_public = server_keys.public_raw().to_vec();
    let (server_probe, mut server_events) = ServerProbe::new();
    let _listener = listen(ListenOptions::new(
        server_keys,
        hub.clone(),
        "peer-b",
        server_probe,
    ));
    settle().await;

    let (client_probe, mut client_events) = ClientProbe::new();
    let mut options = ConnectOptions::new(
        KeyPair::generate(),
        hub.clone(),
        "peer-b",
        server_public,
        client_probe,
    );
    options.hello_value = Some(json!({"nick": "alice"}));
    let _connector = connect(options);

    let (server_peer, info) = server_open(next_server(&mut server_events).await);
    assert_eq!(info.hello_value, Some(json!({"nick": "alice"})));
    let client_peer = client_open(next_client(&mut client_events).await);

    client_peer.status_send(Message::new().json("n", json!(0)));
    match next_server(&mut server_events).await {
        ServerEvent::Message(peer, message) => {
            assert_eq!(message.get("n").unwrap().as_json(), Some(&json!(0)));
            peer.status_send(Message::new().json("n", json!(1)));
        }
        _ => panic!("expected the ping"),
    }
    match next_client(&mut client_events).await {
        ClientEvent::Message(message) => {
            assert_eq!(message.get("n").unwrap().as_json(), Some(&json!(1)));
        }
        _ => panic!("expected the echo"),
    }
    let _ = server_peer;
}

#[tokio::test]
async fn acknowledged_sends_resolve_in_order() {
    init_logging();
    let hub = MemoryHub::new();

    let server_keys = KeyPair::generate();
    let server_public = server_keys.public_raw().to_vec();
    let (server_probe, mut server_events) = ServerProbe::new();
    let _listener = listen(ListenOptions::new(
        server_keys,
        hub.clone(),
        "peer-b",
        server_probe,
    ));
    settle().await;

    let (client_probe, mut client_events) = ClientProbe::new();
    let _connector = connect(ConnectOptions::new(
        KeyPair::generate(),
        hub.clone(),
        "peer-b",
        server_public,
        client_probe,
    ));

    let _ = server_open(next_server(&mut server_events).await);
    let client_peer = client_open(next_client(&mut client_events).await);

    let first = client_peer.send(Message::new().json("k", json!("v1")));
    let second = client_peer.send(Message::new().json("k", json!("v2")));
    let third = client_peer.send(Message::new().json("k", json!("v3")));

    for expected in ["v1", "v2", "v3"] {
        match next_server(&mut server_events).await {
            ServerEvent::Message(_, message) => {
                assert_eq!(message.get("k").unwrap().as_json(), Some(&json!(expected)));
            }
            _ => panic!("expected delivery of {}", expected),
        }
    }

    first.wait().await.unwrap();
    second.wait().await.unwrap();
    third.wait().await.unwrap();
}

#[tokio::test]
async fn binary_payloads_stay_binary() {
    init_logging();
    let hub = MemoryHub::new();

    let server_keys = KeyPair::generate();
    let server_public = server_keys.public_raw().to_vec();
    let (server_probe, mut server_events) = ServerProbe::new();
    let _listener = listen(ListenOptions::new(
        server_keys,
        hub.clone(),
        "peer-b",
        server_probe,
    ));
    settle().await;

    let (client_probe, mut client_events) = ClientProbe::new();
    let _connector = connect(ConnectOptions::new(
        KeyPair::generate(),
        hub.clone(),
        "peer-b",
        server_public,
        client_probe,
    ));

    let _ = server_open(next_server(&mut server_events).await);
    let client_peer = client_open(next_client(&mut client_events).await);

    let receipt = client_peer.send(Message::new().buffer("buf", vec![3, 4, 5]).json("n", json!(7)));
    match next_server(&mut server_events).await {
        ServerEvent::Message(_, message) => {
            assert_eq!(message.get("buf").unwrap().as_buffer(), Some(&[3, 4, 5][..]));
            assert_eq!(message.get("n").unwrap().as_json(), Some(&json!(7)));
        }
        _ => panic!("expected the payload"),
    }
    receipt.wait().await.unwrap();
}

#[tokio::test]
async fn permanent_redirect_moves_the_session() {
    init_logging();
    let hub = MemoryHub::new();

    let b_keys = KeyPair::generate();
    let b_public = b_keys.public_raw().to_vec();
    let (b_probe, mut b_events) = ServerProbe::new();
    let _b_listener = listen(ListenOptions::new(b_keys, hub.clone(), "peer-b", b_probe));

    let c_keys = KeyPair::generate();
    let c_public = c_keys.public_raw().to_vec();
    let (c_probe, mut c_events) = ServerProbe::new();
    let _c_listener = listen(ListenOptions::new(c_keys, hub.clone(), "peer-c", c_probe));
    settle().await;

    let (client_probe, mut client_events) = ClientProbe::new();
    let mut options = ConnectOptions::new(
        KeyPair::generate(),
        hub.clone(),
        "peer-b",
        b_public,
        client_probe,
    );
    options.hello_value = Some(json!({"nick": "alice"}));
    let _connector = connect(options);

    let (b_peer, _info) = server_open(next_server(&mut b_events).await);
    let _client_peer = client_open(next_client(&mut client_events).await);

    b_peer.redirect("peer-c", &c_public, true, Some(json!({"why": "moved"})));

    // Close with the redirect details comes strictly before the successor
    // session opens.
    match next_client(&mut client_events).await {
        ClientEvent::Close(event) => {
            assert_eq!(event.error, Some(Error::Redirected));
            let redirect = event.redirect.expect("redirect details");
            assert_eq!(redirect.address, "peer-c");
            assert_eq!(redirect.public_key, c_public);
            assert!(redirect.permanent);
            assert_eq!(redirect.context, Some(json!({"why": "moved"})));
        }
        ClientEvent::Open(_) => panic!("successor opened before the close"),
        ClientEvent::Message(_) => panic!("unexpected message"),
    }
    let moved_peer = client_open(next_client(&mut client_events).await);

    // The successor receiver sees the redirect context as connection info
    // and the same hello value.
    let (_c_peer, c_info) = server_open(next_server(&mut c_events).await);
    assert_eq!(c_info.connection_info, Some(json!({"why": "moved"})));
    assert_eq!(c_info.hello_value, Some(json!({"nick": "alice"})));

    // And the moved session works.
    let receipt = moved_peer.send(Message::new().json("here", json!("c")));
    match next_server(&mut c_events).await {
        ServerEvent::Message(..) => {}
        _ => panic!("expected delivery at the successor"),
    }
    receipt.wait().await.unwrap();
}

#[tokio::test]
async fn graceful_peer_close_reaches_the_other_side() {
    init_logging();
    let hub = MemoryHub::new();

    let server_keys = KeyPair::generate();
    let server_public = server_keys.public_raw().to_vec();
    let (server_probe, mut server_events) = ServerProbe::new();
    let _listener = listen(ListenOptions::new(
        server_keys,
        hub.clone(),
        "peer-b",
        server_probe,
    ));
    settle().await;

    let (client_probe, mut client_events) = ClientProbe::new();
    let _connector = connect(ConnectOptions::new(
        KeyPair::generate(),
        hub.clone(),
        "peer-b",
        server_public,
        client_probe,
    ));

    let (server_peer, _) = server_open(next_server(&mut server_events).await);
    let client_peer = client_open(next_client(&mut client_events).await);

    server_peer.close(None);

    match next_client(&mut client_events).await {
        ClientEvent::Close(event) => {
            assert_eq!(event.error, None);
            assert!(event.redirect.is_none());
        }
        _ => panic!("expected an orderly close"),
    }

    // The closing side stays silent about its own local close.
    assert_quiet(&mut server_events).await;

    // Sends against the dead session reject.
    let receipt = client_peer.send(Message::new().json("x", json!(1)));
    assert_eq!(receipt.wait().await.unwrap_err(), Error::Closed);
}

#[tokio::test]
async fn iv_exhaustion_tears_the_session_down() {
    init_logging();
    let hub = MemoryHub::new();

    let server_keys = KeyPair::generate();
    let server_public = server_keys.public_raw().to_vec();
    let (server_probe, mut server_events) = ServerProbe::new();
    let _listener = listen(ListenOptions::new(
        server_keys,
        hub.clone(),
        "peer-b",
        server_probe,
    ));
    settle().await;

    let (client_probe, mut client_events) = ClientProbe::new();
    let mut options = ConnectOptions::new(
        KeyPair::generate(),
        hub.clone(),
        "peer-b",
        server_public,
        client_probe,
    );
    // One IV goes to the handshake, each single-field message takes two:
    // the third message trips the bound.
    options.iv_limit = 5;
    let _connector = connect(options);

    let _ = server_open(next_server(&mut server_events).await);
    let client_peer = client_open(next_client(&mut client_events).await);

    for n in 0..3 {
        client_peer.status_send(Message::new().json("n", json!(n)));
    }

    match next_client(&mut client_events).await {
        ClientEvent::Close(event) => assert_eq!(event.error, Some(Error::IvExhausted)),
        _ => panic!("expected the exhaustion close"),
    }

    // The peer just observes its transport going away.
    let mut saw_orderly_close = false;
    for _ in 0..3 {
        match next_server(&mut server_events).await {
            ServerEvent::Message(..) => {}
            ServerEvent::Close(None) => {
                saw_orderly_close = true;
                break;
            }
            ServerEvent::Close(Some(error)) => panic!("unexpected error close: {}", error),
            ServerEvent::Open(..) => panic!("unexpected open"),
        }
    }
    assert!(saw_orderly_close);
}

#[tokio::test]
async fn wrong_receiver_key_never_opens() {
    init_logging();
    let hub = MemoryHub::new();

    // The listener holds a different keypair than the one the initiator
    // expects, so it cannot unwrap the handshake key.
    let (server_probe, mut server_events) = ServerProbe::new();
    let _listener = listen(ListenOptions::new(
        KeyPair::generate(),
        hub.clone(),
        "peer-b",
        server_probe,
    ));
    settle().await;

    let expected = KeyPair::generate().public_raw().to_vec();
    let (client_probe, mut client_events) = ClientProbe::new();
    let _connector = connect(ConnectOptions::new(
        KeyPair::generate(),
        hub.clone(),
        "peer-b",
        expected,
        client_probe,
    ));

    match next_client(&mut client_events).await {
        ClientEvent::Close(event) => match event.error {
            Some(Error::HandshakeFailed(_)) => {}
            other => panic!("expected a handshake failure, got {:?}", other),
        },
        ClientEvent::Open(_) => panic!("session opened against the wrong key"),
        ClientEvent::Message(_) => panic!("unexpected message"),
    }

    match next_server(&mut server_events).await {
        ServerEvent::Close(Some(Error::HandshakeFailed(_))) => {}
        ServerEvent::Close(other) => panic!("expected a handshake failure, got {:?}", other),
        _ => panic!("expected a close"),
    }
}

#[tokio::test]
async fn no_callbacks_after_the_caller_closes() {
    init_logging();
    let hub = MemoryHub::new();

    let server_keys = KeyPair::generate();
    let server_public = server_keys.public_raw().to_vec();
    let (server_probe, mut server_events) = ServerProbe::new();
    let _listener = listen(ListenOptions::new(
        server_keys,
        hub.clone(),
        "peer-b",
        server_probe,
    ));
    settle().await;

    let (client_probe, mut client_events) = ClientProbe::new();
    let connector = connect(ConnectOptions::new(
        KeyPair::generate(),
        hub.clone(),
        "peer-b",
        server_public,
        client_probe,
    ));

    let (server_peer, _) = server_open(next_server(&mut server_events).await);
    let _client_peer = client_open(next_client(&mut client_events).await);

    connector.close(None);
    server_peer.status_send(Message::new().json("late", json!(true)));

    assert_quiet(&mut client_events).await;
}

#[tokio::test]
async fn stopping_a_listener_quiets_everything() {
    init_logging();
    let hub = MemoryHub::new();

    let server_keys = KeyPair::generate();
    let server_public = server_keys.public_raw().to_vec();
    let (server_probe, mut server_events) = ServerProbe::new();
    let listener = listen(ListenOptions::new(
        server_keys,
        hub.clone(),
        "peer-b",
        server_probe,
    ));
    settle().await;

    let (client_probe, mut client_events) = ClientProbe::new();
    let _connector = connect(ConnectOptions::new(
        KeyPair::generate(),
        hub.clone(),
        "peer-b",
        server_public.clone(),
        client_probe,
    ));

    let _ = server_open(next_server(&mut server_events).await);
    let _client_peer = client_open(next_client(&mut client_events).await);

    listener.stop(Some("shutting down".to_owned()));

    // The live session went down as a local close: silent on the listener
    // side, an orderly close for the peer.
    match next_client(&mut client_events).await {
        ClientEvent::Close(event) => assert_eq!(event.error, None),
        _ => panic!("expected the orderly close"),
    }
    assert_quiet(&mut server_events).await;

    // New connection attempts are refused.
    let (retry_probe, mut retry_events) = ClientProbe::new();
    let _retry = connect(ConnectOptions::new(
        KeyPair::generate(),
        hub.clone(),
        "peer-b",
        server_public,
        retry_probe,
    ));
    match next_client(&mut retry_events).await {
        ClientEvent::Close(event) => match event.error {
            Some(Error::TransportFailed(_)) => {}
            other => panic!("expected a transport failure, got {:?}", other),
        },
        _ => panic!("expected a refused connection"),
    }
}
