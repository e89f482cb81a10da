//! The session task behind `SessionHandle`.

use std::time::Duration;

use peerlink_lib::peer::surface::StaticSurface;
use peerlink_lib::peer::{MemoryHandle, MemoryTransport, Payload};
use peerlink_lib::{
    spawn_session, MessageOrigin, SdpKind, SessionConfig, SessionError, SessionEvent,
    SessionHandle, SessionState, TransportError,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const ANSWER: &str = r#"{"type":"answer","sdp":"v=0\r\na=fingerprint:sha-256 CC:DD\r\n"}"#;

fn start() -> (
    SessionHandle,
    JoinHandle<()>,
    MemoryHandle,
    UnboundedReceiver<SessionEvent>,
) {
    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (transport, peer) = MemoryTransport::new(transport_tx);
    let (handle, task) = spawn_session(
        transport,
        transport_rx,
        event_tx,
        StaticSurface::new(100.0, 100.0),
        SessionConfig::default(),
    );
    (handle, task, peer, event_rx)
}

async fn next_remote_message(events: &mut UnboundedReceiver<SessionEvent>) -> String {
    let wait = async {
        loop {
            match events.recv().await {
                Some(SessionEvent::MessageReceived {
                    text,
                    origin: MessageOrigin::Remote,
                }) => break text,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    };
    timeout(Duration::from_secs(5), wait).await.expect("timeout")
}

#[tokio::test]
async fn handle_drives_an_initiator_session() {
    let (handle, task, peer, mut events) = start();

    let offer = handle.create_offer().await.unwrap();
    assert_eq!(offer.kind, SdpKind::Offer);
    assert!(offer.sdp.contains("a=candidate:"));
    assert_eq!(
        handle.apply_remote_description(ANSWER).await.unwrap(),
        SdpKind::Answer
    );

    peer.open_channel("chat").unwrap();
    peer.open_channel("control").unwrap();
    peer.deliver_text("chat", "hello");
    assert_eq!(next_remote_message(&mut events).await, "hello");

    assert!(handle.send_chat_message("hi back").await.unwrap());
    assert_eq!(peer.sent_on("chat"), vec![Payload::Text("hi back".into())]);

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Connected);
    assert!(snapshot.chat_open && snapshot.control_open);
    assert_eq!(snapshot.input_budget_remaining, 600);
    assert!(snapshot.fingerprint.is_some());

    handle.disconnect().await.unwrap();
    drop(handle);
    task.await.unwrap();
    assert_eq!(peer.close_calls(), 1);
}

#[tokio::test]
async fn disconnect_cancels_a_pending_offer() {
    let (handle, task, peer, _events) = start();
    peer.set_manual_gathering(true);

    let waiting = tokio::spawn({
        let handle = handle.clone();
        async move { handle.create_offer().await }
    });

    timeout(Duration::from_secs(5), async {
        while handle.snapshot().await.unwrap().state != SessionState::GatheringLocal {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("offer never started");

    handle.disconnect().await.unwrap();
    let outcome = waiting.await.unwrap();
    assert_eq!(
        outcome.unwrap_err(),
        SessionError::Transport(TransportError::NotStarted)
    );
    assert!(!handle.snapshot().await.unwrap().busy);

    drop(handle);
    task.await.unwrap();
}

#[tokio::test]
async fn stopped_task_is_reported() {
    let (handle, task, _peer, _events) = start();
    task.abort();
    let _ = task.await;
    assert_eq!(handle.snapshot().await, Err(SessionError::Stopped));
    assert_eq!(handle.clear_chat().await, Err(SessionError::Stopped));
}
