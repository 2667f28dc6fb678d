//! Unit tests for the response router task.
//!
//! Covers:
//! - decoded objects reach the inbox in arrival order
//! - non-JSON noise is dropped in tolerant mode
//! - non-JSON noise fails the session in strict mode
//! - oversized lines are skipped without ending the stream
//! - EOF marks a live session failed and closes the inbox
//! - cancellation stops the router without touching the state

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use tool_conduit::rpc::inbox::{channel, Inbox, Popped};
use tool_conduit::rpc::router::{Router, StateCell};
use tool_conduit::rpc::SessionState;

const SLICE: Duration = Duration::from_secs(2);

fn router(strict: bool, max_line_bytes: usize) -> (Router, Inbox, StateCell) {
    let (tx, inbox) = channel();
    let (state, _) = watch::channel(SessionState::Ready);
    let state = Arc::new(state);
    let router = Router {
        server: "test".into(),
        strict,
        max_line_bytes,
        inbox: tx,
        state: Arc::clone(&state),
    };
    (router, inbox, state)
}

#[tokio::test]
async fn objects_are_forwarded_in_order() {
    let (router, mut inbox, state) = router(false, 1024);
    let (mut child_stdout, reader) = tokio::io::duplex(4096);
    let task = tokio::spawn(router.run(reader, CancellationToken::new()));

    child_stdout
        .write_all(b"{\"id\":1,\"result\":\"a\"}\n\n{\"id\":2,\"result\":\"b\"}\n")
        .await
        .unwrap();

    assert_eq!(
        inbox.pop(SLICE).await,
        Popped::Message(json!({"id": 1, "result": "a"}))
    );
    assert_eq!(
        inbox.pop(SLICE).await,
        Popped::Message(json!({"id": 2, "result": "b"}))
    );

    drop(child_stdout);
    task.await.unwrap();
    assert_eq!(*state.borrow(), SessionState::Failed);
}

#[tokio::test]
async fn noise_is_dropped_in_tolerant_mode() {
    let (router, mut inbox, state) = router(false, 1024);
    let (mut child_stdout, reader) = tokio::io::duplex(4096);
    let _task = tokio::spawn(router.run(reader, CancellationToken::new()));

    child_stdout
        .write_all(b"Starting server...\n42\n{\"id\":3,\"result\":null}\n")
        .await
        .unwrap();

    assert_eq!(
        inbox.pop(SLICE).await,
        Popped::Message(json!({"id": 3, "result": null}))
    );
    assert_eq!(*state.borrow(), SessionState::Ready);
}

#[tokio::test]
async fn noise_fails_session_in_strict_mode() {
    let (router, mut inbox, state) = router(true, 1024);
    let (mut child_stdout, reader) = tokio::io::duplex(4096);
    let task = tokio::spawn(router.run(reader, CancellationToken::new()));

    child_stdout
        .write_all(b"Starting server...\n{\"id\":1,\"result\":1}\n")
        .await
        .unwrap();

    task.await.unwrap();
    assert_eq!(*state.borrow(), SessionState::Failed);
    assert_eq!(inbox.pop(SLICE).await, Popped::Closed);
}

#[tokio::test]
async fn oversized_line_is_skipped() {
    let (router, mut inbox, state) = router(true, 32);
    let (mut child_stdout, reader) = tokio::io::duplex(4096);
    let _task = tokio::spawn(router.run(reader, CancellationToken::new()));

    let mut payload = vec![b'x'; 100];
    payload.extend_from_slice(b"\n{\"id\":4,\"result\":1}\n");
    child_stdout.write_all(&payload).await.unwrap();

    assert_eq!(
        inbox.pop(SLICE).await,
        Popped::Message(json!({"id": 4, "result": 1}))
    );
    assert_eq!(*state.borrow(), SessionState::Ready);
}

#[tokio::test]
async fn eof_fails_live_session_and_closes_inbox() {
    let (router, mut inbox, state) = router(false, 1024);
    let (child_stdout, reader) = tokio::io::duplex(64);
    let task = tokio::spawn(router.run(reader, CancellationToken::new()));

    drop(child_stdout);
    task.await.unwrap();

    assert_eq!(*state.borrow(), SessionState::Failed);
    assert_eq!(inbox.pop(SLICE).await, Popped::Closed);
}

#[tokio::test]
async fn eof_leaves_stopped_session_alone() {
    let (router, _inbox, state) = router(false, 1024);
    state.send_replace(SessionState::Stopped);
    let (child_stdout, reader) = tokio::io::duplex(64);
    let task = tokio::spawn(router.run(reader, CancellationToken::new()));

    drop(child_stdout);
    task.await.unwrap();

    assert_eq!(*state.borrow(), SessionState::Stopped);
}

#[tokio::test]
async fn cancellation_stops_router_without_state_change() {
    let (router, _inbox, state) = router(false, 1024);
    let (_child_stdout, reader) = tokio::io::duplex(64);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(router.run(reader, cancel.clone()));

    cancel.cancel();
    tokio::time::timeout(SLICE, task)
        .await
        .expect("router must stop on cancel")
        .unwrap();

    assert_eq!(*state.borrow(), SessionState::Ready);
}
