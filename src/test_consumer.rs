use std::sync::Arc;

use serde_json::json;
use tokio::sync::oneshot;

use crypto::{KeyPair, IV_COUNTER_LIMIT};
use wire::{build_record, ClearText, Message};

use crate::error::Error;
use crate::session::{RedirectInfo, Session, Step};

fn transmits(steps: &[Step]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for step in steps {
        if let Step::Transmit(chunk) = step {
            bytes.extend_from_slice(chunk);
        }
    }
    bytes
}

fn transmit_records(steps: &[Step]) -> Vec<Vec<u8>> {
    steps
        .iter()
        .filter_map(|step| match step {
            Step::Transmit(chunk) => Some(chunk.clone()),
            _ => None,
        })
        .collect()
}

// Runs the two-record handshake by hand and returns both open consumers.
fn open_pair() -> (Session, Session) {
    let initiator_keys = Arc::new(KeyPair::generate());
    let receiver_keys = Arc::new(KeyPair::generate());

    let mut initiator = Session::initiator(
        initiator_keys,
        receiver_keys.public().clone(),
        None,
        None,
        IV_COUNTER_LIMIT,
    );
    let mut receiver = Session::receiver(receiver_keys, IV_COUNTER_LIMIT);

    let hello = transmits(&initiator.start().unwrap());
    let steps = receiver.accept_bytes(&hello).unwrap();
    let auth_hello = transmits(&steps);
    assert!(matches!(steps.last(), Some(Step::Opened(_))));

    let steps = initiator.accept_bytes(&auth_hello).unwrap();
    assert!(matches!(steps.first(), Some(Step::Opened(_))));

    (initiator, receiver)
}

#[test]
fn handshake_reports_peer_identity_and_payloads() {
    let initiator_keys = Arc::new(KeyPair::generate());
    let receiver_keys = Arc::new(KeyPair::generate());
    let initiator_raw = initiator_keys.public_raw().to_vec();

    let mut initiator = Session::initiator(
        initiator_keys,
        receiver_keys.public().clone(),
        Some(json!({"greeting": "hi"})),
        Some(json!("plain")),
        IV_COUNTER_LIMIT,
    );
    let mut receiver = Session::receiver(receiver_keys.clone(), IV_COUNTER_LIMIT);

    let hello = transmits(&initiator.start().unwrap());
    let steps = receiver.accept_bytes(&hello).unwrap();

    match steps.last() {
        Some(Step::Opened(info)) => {
            assert_eq!(info.peer_public_key, initiator_raw);
            assert_eq!(info.hello_value, Some(json!({"greeting": "hi"})));
            assert_eq!(info.connection_info, Some(json!("plain")));
        }
        other => panic!("expected an opened step, got {}", step_name(other)),
    }

    let steps = initiator.accept_bytes(&transmits(&steps)).unwrap();
    match steps.first() {
        Some(Step::Opened(info)) => {
            assert_eq!(info.peer_public_key, receiver_keys.public_raw().to_vec());
        }
        other => panic!("expected an opened step, got {}", step_name(other)),
    }
}

fn step_name(step: Option<&Step>) -> &'static str {
    match step {
        Some(Step::Transmit(_)) => "transmit",
        Some(Step::Opened(_)) => "opened",
        Some(Step::Deliver(_)) => "deliver",
        Some(Step::Redirect(_)) => "redirect",
        None => "nothing",
    }
}

#[test]
fn messages_survive_the_wire_with_buffers_intact() {
    let (mut initiator, mut receiver) = open_pair();

    let message = Message::new()
        .buffer("buf", vec![3, 4, 5])
        .json("n", json!(7))
        .json("tree", json!({"a": [1, 2, {"b": null}]}));

    let bytes = initiator.encode_status_send(&message).unwrap();
    let steps = receiver.accept_bytes(&bytes).unwrap();
    match steps.first() {
        Some(Step::Deliver(received)) => {
            assert_eq!(received, &message);
            assert_eq!(received.get("buf").unwrap().as_buffer(), Some(&[3, 4, 5][..]));
            assert_eq!(received.get("n").unwrap().as_json(), Some(&json!(7)));
        }
        other => panic!("expected delivery, got {}", step_name(other)),
    }

    // And the other direction.
    let bytes = receiver.encode_status_send(&message).unwrap();
    let steps = initiator.accept_bytes(&bytes).unwrap();
    assert!(matches!(steps.first(), Some(Step::Deliver(m)) if m == &message));
}

#[test]
fn acknowledgements_resolve_waiters_oldest_first() {
    let (mut initiator, mut receiver) = open_pair();

    let mut receipts = Vec::new();
    let mut outgoing = Vec::new();
    for i in 0..3 {
        let bytes = initiator
            .encode_send(&Message::new().json("i", json!(i)))
            .unwrap();
        let (waiter, receipt) = oneshot::channel();
        initiator.push_ack(waiter);
        receipts.push(receipt);
        outgoing.extend_from_slice(&bytes);
    }

    let steps = receiver.accept_bytes(&outgoing).unwrap();
    let deliveries = steps
        .iter()
        .filter(|step| matches!(step, Step::Deliver(_)))
        .count();
    assert_eq!(deliveries, 3);
    let acks = transmit_records(&steps);
    assert_eq!(acks.len(), 3);

    // One acknowledgement resolves exactly the oldest waiter.
    initiator.accept_bytes(&acks[0]).unwrap();
    assert!(matches!(receipts[0].try_recv(), Ok(Ok(()))));
    assert!(receipts[1].try_recv().is_err());
    assert!(receipts[2].try_recv().is_err());

    initiator.accept_bytes(&acks[1]).unwrap();
    initiator.accept_bytes(&acks[2]).unwrap();
    assert!(matches!(receipts[1].try_recv(), Ok(Ok(()))));
    assert!(matches!(receipts[2].try_recv(), Ok(Ok(()))));
}

#[test]
fn acknowledgement_with_nothing_outstanding_is_fatal() {
    let (mut initiator, mut receiver) = open_pair();

    // The receiver sends an acknowledged message, but nobody parked a
    // waiter for it; the automatic acknowledgement then has no match.
    let bytes = receiver
        .encode_send(&Message::new().json("x", json!(1)))
        .unwrap();
    let steps = initiator.accept_bytes(&bytes).unwrap();
    let ack = transmits(&steps);

    match receiver.accept_bytes(&ack) {
        Err(Error::ProtocolViolation(_)) => {}
        other => panic!("expected a protocol violation, got {:?}", other.map(|s| s.len())),
    }
}

#[test]
fn tampered_record_fails_authentication() {
    let (mut initiator, mut receiver) = open_pair();

    let mut bytes = initiator
        .encode_status_send(&Message::new().json("k", json!("v")))
        .unwrap();
    bytes[10] ^= 0x01;

    assert_eq!(receiver.accept_bytes(&bytes).unwrap_err(), Error::Auth);
}

#[test]
fn hello_version_gate() {
    let receiver_keys = Arc::new(KeyPair::generate());

    let junk = Message::new()
        .buffer("handshakeKey", vec![0; 165])
        .buffer("helloData", vec![0; 32]);

    let mut receiver = Session::receiver(receiver_keys.clone(), IV_COUNTER_LIMIT);
    let record = build_record("Hello", Some(1), &junk, &mut ClearText).unwrap();
    assert_eq!(
        receiver.accept_bytes(&record).unwrap_err(),
        Error::UnsupportedVersion(Some(1))
    );

    let mut receiver = Session::receiver(receiver_keys, IV_COUNTER_LIMIT);
    let record = build_record("Hello", None, &junk, &mut ClearText).unwrap();
    assert_eq!(
        receiver.accept_bytes(&record).unwrap_err(),
        Error::UnsupportedVersion(None)
    );
}

#[test]
fn redirect_reaches_the_initiator_with_every_field() {
    let (mut initiator, mut receiver) = open_pair();

    let target = KeyPair::generate();
    let info = RedirectInfo {
        address: "peer-c".to_owned(),
        public_key: target.public_raw().to_vec(),
        permanent: true,
        context: Some(json!({"why": "moved"})),
    };
    let bytes = receiver.encode_redirect(&info).unwrap();

    let steps = initiator.accept_bytes(&bytes).unwrap();
    match steps.first() {
        Some(Step::Redirect(got)) => {
            assert_eq!(got.address, "peer-c");
            assert_eq!(got.public_key, target.public_raw().to_vec());
            assert!(got.permanent);
            assert_eq!(got.context, Some(json!({"why": "moved"})));
        }
        other => panic!("expected a redirect step, got {}", step_name(other)),
    }
}

#[test]
fn redirect_aimed_at_a_receiver_is_a_violation() {
    let (mut initiator, mut receiver) = open_pair();

    let target = KeyPair::generate();
    let info = RedirectInfo {
        address: "peer-c".to_owned(),
        public_key: target.public_raw().to_vec(),
        permanent: false,
        context: None,
    };
    let bytes = initiator.encode_redirect(&info).unwrap();

    assert!(matches!(
        receiver.accept_bytes(&bytes),
        Err(Error::ProtocolViolation(_))
    ));
}

#[test]
fn unknown_record_type_is_a_violation() {
    let (mut initiator, mut receiver) = open_pair();

    let bytes = initiator.encode_raw("Ping", &Message::new()).unwrap();
    assert!(matches!(
        receiver.accept_bytes(&bytes),
        Err(Error::ProtocolViolation(_))
    ));
}

#[test]
fn handshake_record_after_open_is_a_violation() {
    let (mut initiator, mut receiver) = open_pair();

    let bytes = initiator.encode_raw("Hello", &Message::new()).unwrap();
    assert!(matches!(
        receiver.accept_bytes(&bytes),
        Err(Error::ProtocolViolation(_))
    ));
}

#[test]
fn iv_counters_exhaust_at_the_reduced_bound() {
    let initiator_keys = Arc::new(KeyPair::generate());
    let receiver_keys = Arc::new(KeyPair::generate());

    // Five IVs for the initiator: one goes to the handshake, each
    // single-field message burns two (identifier plus blob).
    let mut initiator = Session::initiator(
        initiator_keys,
        receiver_keys.public().clone(),
        None,
        None,
        5,
    );
    let mut receiver = Session::receiver(receiver_keys, IV_COUNTER_LIMIT);

    let hello = transmits(&initiator.start().unwrap());
    let auth_hello = transmits(&receiver.accept_bytes(&hello).unwrap());
    initiator.accept_bytes(&auth_hello).unwrap();

    let message = Message::new().json("n", json!(1));
    initiator.encode_status_send(&message).unwrap();
    initiator.encode_status_send(&message).unwrap();
    assert_eq!(
        initiator.encode_status_send(&message).unwrap_err(),
        Error::IvExhausted
    );
}

#[test]
fn closed_sessions_neither_parse_nor_seal() {
    let (mut initiator, _receiver) = open_pair();

    initiator.close();
    assert_eq!(
        initiator
            .encode_send(&Message::new().json("x", json!(1)))
            .unwrap_err(),
        Error::Closed
    );
    assert!(initiator.accept_bytes(&[1, 2, 3]).unwrap().is_empty());
}

#[test]
fn teardown_rejects_every_parked_waiter_with_the_reason() {
    let (mut initiator, _receiver) = open_pair();

    let (first_tx, mut first_rx) = oneshot::channel();
    let (second_tx, mut second_rx) = oneshot::channel();
    initiator.push_ack(first_tx);
    initiator.push_ack(second_tx);

    initiator.fail_pending(&Error::Redirected);
    assert!(matches!(first_rx.try_recv(), Ok(Err(Error::Redirected))));
    assert!(matches!(second_rx.try_recv(), Ok(Err(Error::Redirected))));
}
