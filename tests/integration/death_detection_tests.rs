//! A child that dies is reported promptly, not after the full call budget.

use std::time::{Duration, Instant};

use serde_json::json;

use tool_conduit::rpc::SessionState;
use tool_conduit::AppError;

use super::test_helpers::{exit_on_call_server, transport, wait_until_exited, EXIT_AFTER_HANDSHAKE};

#[tokio::test]
async fn child_exiting_while_call_is_outstanding_is_detected() {
    let mut transport = transport(EXIT_AFTER_HANDSHAKE);
    transport.start().await.expect("handshake completes before exit");

    let started = Instant::now();
    let result = transport.call_operation("echo", &json!({}), 30.0).await;

    assert!(result.is_none());
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "death must be noticed long before the 30 s budget: {:?}",
        started.elapsed()
    );
    assert!(wait_until_exited(&mut transport).await);
    let mut states = transport.subscribe_state();
    let failed = tokio::time::timeout(
        Duration::from_secs(2),
        states.wait_for(|state| *state == SessionState::Failed),
    )
    .await;
    assert!(matches!(failed, Ok(Ok(_))));
}

#[tokio::test]
async fn child_exiting_on_request_is_process_died() {
    let mut transport = transport(exit_on_call_server());
    transport.start().await.unwrap();

    let started = Instant::now();
    let result = transport
        .call_tool("echo", &json!({}), Duration::from_secs(30))
        .await;

    assert!(matches!(result, Err(AppError::ProcessDied(_))), "{result:?}");
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn calls_after_death_fail_fast() {
    let mut transport = transport(exit_on_call_server());
    transport.start().await.unwrap();
    let _ = transport
        .call_tool("echo", &json!({}), Duration::from_secs(30))
        .await;
    assert!(wait_until_exited(&mut transport).await);

    let started = Instant::now();
    let result = transport
        .call_tool("echo", &json!({}), Duration::from_secs(30))
        .await;

    assert!(matches!(result, Err(AppError::ProcessDied(_))), "{result:?}");
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn state_watchers_observe_the_failure() {
    let mut transport = transport(EXIT_AFTER_HANDSHAKE);
    let mut states = transport.subscribe_state();
    transport.start().await.unwrap();

    let observed = tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == SessionState::Failed),
    )
    .await;

    assert!(matches!(observed, Ok(Ok(_))), "state never became Failed");
}

#[tokio::test]
async fn start_after_death_spawns_a_new_generation() {
    let mut transport = transport(exit_on_call_server());
    transport.start().await.unwrap();
    let _ = transport
        .call_tool("echo", &json!({}), Duration::from_secs(30))
        .await;
    assert!(wait_until_exited(&mut transport).await);

    transport.start().await.expect("restart should succeed");

    assert_eq!(transport.state(), SessionState::Ready);
    assert_eq!(transport.generation(), 2);
    assert!(transport.is_running());
    transport.stop().await;
}
