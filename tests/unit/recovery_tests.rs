//! Unit tests for the restart-once recovery policy.
//!
//! A scripted in-memory transport records every lifecycle call so the tests
//! can assert exactly how often the child was started, stopped, and called.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use serde_json::{json, Value};

use tool_conduit::rpc::{ensure_and_call, RecoverableTransport};
use tool_conduit::{AppError, Result};

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    pub running: bool,
    pub starts: usize,
    pub stops: usize,
    pub calls: usize,
    pub start_failures: VecDeque<AppError>,
    pub replies: VecDeque<Result<Value>>,
}

impl ScriptedTransport {
    pub fn with_replies(replies: impl IntoIterator<Item = Result<Value>>) -> Self {
        Self {
            replies: replies.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl RecoverableTransport for ScriptedTransport {
    fn is_running(&mut self) -> bool {
        self.running
    }

    fn start(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.starts += 1;
            if let Some(err) = self.start_failures.pop_front() {
                self.running = false;
                return Err(err);
            }
            self.running = true;
            Ok(())
        })
    }

    fn stop(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.stops += 1;
            self.running = false;
        })
    }

    fn call_operation_once<'a>(
        &'a mut self,
        _name: &'a str,
        _arguments: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
        Box::pin(async move {
            self.calls += 1;
            self.replies
                .pop_front()
                .unwrap_or_else(|| Err(AppError::ProcessDied("script exhausted".into())))
        })
    }
}

#[tokio::test]
async fn starts_child_when_not_running() {
    let mut transport = ScriptedTransport::with_replies([Ok(json!({"rows": 3}))]);

    let result = ensure_and_call(&mut transport, "count", &json!({})).await;

    assert_eq!(result.unwrap(), json!({"rows": 3}));
    assert_eq!(transport.starts, 1);
    assert_eq!(transport.calls, 1);
    assert_eq!(transport.stops, 0);
}

#[tokio::test]
async fn running_child_is_not_restarted() {
    let mut transport = ScriptedTransport::with_replies([Ok(json!(1))]);
    transport.running = true;

    ensure_and_call(&mut transport, "count", &json!({}))
        .await
        .unwrap();

    assert_eq!(transport.starts, 0);
    assert_eq!(transport.calls, 1);
}

#[tokio::test]
async fn dead_child_is_restarted_once_and_call_retried() {
    let mut transport = ScriptedTransport::with_replies([
        Err(AppError::ProcessDied("exited".into())),
        Ok(json!({"ok": true})),
    ]);
    transport.running = true;

    let result = ensure_and_call(&mut transport, "count", &json!({})).await;

    assert_eq!(result.unwrap(), json!({"ok": true}));
    assert_eq!(transport.stops, 1);
    assert_eq!(transport.starts, 1);
    assert_eq!(transport.calls, 2);
}

#[tokio::test]
async fn not_initialized_session_is_restarted_once() {
    let mut transport = ScriptedTransport::with_replies([
        Err(AppError::NotInitialized("session is failed".into())),
        Ok(json!(null)),
    ]);
    transport.running = true;

    let result = ensure_and_call(&mut transport, "count", &json!({})).await;

    assert_eq!(result.unwrap(), Value::Null);
    assert_eq!(transport.calls, 2);
}

#[tokio::test]
async fn underlying_call_runs_at_most_twice() {
    let mut transport = ScriptedTransport::with_replies([
        Err(AppError::ProcessDied("first".into())),
        Err(AppError::ProcessDied("second".into())),
        Ok(json!("never reached")),
    ]);

    let result = ensure_and_call(&mut transport, "count", &json!({})).await;

    match result {
        Err(AppError::ProcessDied(msg)) => assert_eq!(msg, "second"),
        other => panic!("expected ProcessDied, got {other:?}"),
    }
    assert_eq!(transport.calls, 2);
    assert_eq!(transport.starts, 2);
    assert_eq!(transport.stops, 1);
    assert_eq!(transport.replies.len(), 1);
}

#[tokio::test]
async fn timeout_is_not_retried() {
    let mut transport =
        ScriptedTransport::with_replies([Err(AppError::Timeout("slow".into())), Ok(json!(1))]);
    transport.running = true;

    let result = ensure_and_call(&mut transport, "count", &json!({})).await;

    assert!(matches!(result, Err(AppError::Timeout(_))));
    assert_eq!(transport.calls, 1);
    assert_eq!(transport.stops, 0);
}

#[tokio::test]
async fn remote_error_is_returned_as_is() {
    let error = json!({"code": -32602, "message": "invalid params"});
    let mut transport = ScriptedTransport::with_replies([Err(AppError::Remote(error.clone()))]);
    transport.running = true;

    let result = ensure_and_call(&mut transport, "count", &json!({})).await;

    match result {
        Err(AppError::Remote(value)) => assert_eq!(value, error),
        other => panic!("expected Remote error, got {other:?}"),
    }
    assert_eq!(transport.calls, 1);
}

#[tokio::test]
async fn failed_initial_start_skips_the_call() {
    let mut transport = ScriptedTransport::with_replies([Ok(json!(1))]);
    transport
        .start_failures
        .push_back(AppError::Launch("no such file".into()));

    let result = ensure_and_call(&mut transport, "count", &json!({})).await;

    assert!(matches!(result, Err(AppError::Launch(_))));
    assert_eq!(transport.calls, 0);
}

#[tokio::test]
async fn failed_recovery_start_is_returned() {
    let mut transport =
        ScriptedTransport::with_replies([Err(AppError::ProcessDied("exited".into()))]);
    transport.running = true;
    transport
        .start_failures
        .push_back(AppError::Handshake("timed out".into()));

    let result = ensure_and_call(&mut transport, "count", &json!({})).await;

    assert!(matches!(result, Err(AppError::Handshake(_))));
    assert_eq!(transport.calls, 1);
    assert_eq!(transport.stops, 1);
}
