//! Subprocess RPC transport.
//!
//! [`RpcTransport`] owns one child server at a time and everything bound to
//! it: the process handle, the framed stdin writer, the inbox, the router
//! and stderr tasks, the request id counter, and the session state. A
//! "generation" is one spawn of the child; every `start()` begins a new one
//! with ids counting from 1 and an empty inbox.
//!
//! # Correlation
//!
//! Each call writes one request, then pops the inbox in short slices until a
//! message with the same `id` shows up:
//!
//! - a different `id` is a stale answer to a call that already timed out; it
//!   is logged at `WARN` and discarded;
//! - an empty slice triggers a liveness check, so a dead child is reported
//!   within one slice instead of after the full budget;
//! - a closed inbox means the router saw EOF on stdout.
//!
//! This scheme relies on at most one call being in flight per transport.
//! Every call path takes `&mut self`, so the borrow checker enforces that
//! for direct owners; shared owners go through
//! [`TransportRegistry`](crate::rpc::registry::TransportRegistry), which
//! wraps each transport in its own mutex.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::process::ChildStdin;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, ServerConfig};
use crate::rpc::envelope::{message_id, Notification, OperationParams, Request, Response};
use crate::rpc::framer::FrameWriter;
use crate::rpc::inbox::{self, Inbox, Popped};
use crate::rpc::recovery::RecoverableTransport;
use crate::rpc::router::{run_stderr_logger, Router, StateCell};
use crate::rpc::session::{
    InitializeParams, SessionState, CALL_OPERATION_METHOD, INITIALIZED_NOTIFICATION,
    INITIALIZE_METHOD, LIST_OPERATIONS_METHOD,
};
use crate::rpc::supervisor::{self, ChildProcess};
use crate::{AppError, Result};

/// Resources belonging to one spawn of the child.
struct Generation {
    process: ChildProcess,
    writer: FrameWriter<ChildStdin>,
    inbox: Inbox,
    cancel: CancellationToken,
    router: JoinHandle<()>,
    stderr_logger: JoinHandle<()>,
    // Stops the background tasks if the transport is dropped without `stop()`.
    _cancel_on_drop: DropGuard,
}

/// Client for one long-lived child server speaking line-delimited JSON-RPC.
pub struct RpcTransport {
    server: String,
    config: ServerConfig,
    client: ClientConfig,
    state: StateCell,
    last_id: u64,
    generation: Option<Generation>,
    generations_started: u64,
    server_info: Option<Value>,
}

impl std::fmt::Debug for RpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcTransport")
            .field("server", &self.server)
            .field("state", &self.state())
            .field("last_id", &self.last_id)
            .field("generation", &self.generations_started)
            .finish_non_exhaustive()
    }
}

impl RpcTransport {
    /// Create a transport for the server kind `server`. Nothing is spawned
    /// until [`start`](Self::start).
    #[must_use]
    pub fn new(server: impl Into<String>, config: ServerConfig, client: ClientConfig) -> Self {
        let (state, _) = watch::channel(SessionState::NotStarted);
        Self {
            server: server.into(),
            config,
            client,
            state: StateCell::new(state),
            last_id: 0,
            generation: None,
            generations_started: 0,
            server_info: None,
        }
    }

    /// Server kind this transport was created for.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Launch and timing settings.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe session state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Number of generations that completed their handshake.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generations_started
    }

    /// Id of the most recent request in the current generation; 0 if none.
    #[must_use]
    pub fn last_request_id(&self) -> u64 {
        self.last_id
    }

    /// Decoded messages waiting in the inbox.
    #[must_use]
    pub fn inbox_len(&self) -> usize {
        self.generation.as_ref().map_or(0, |g| g.inbox.len())
    }

    /// The child's `initialize` result, while a generation is live.
    #[must_use]
    pub fn server_info(&self) -> Option<&Value> {
        self.server_info.as_ref()
    }

    /// Whether a child process exists and has not exited.
    pub fn is_running(&mut self) -> bool {
        self.generation
            .as_mut()
            .is_some_and(|g| g.process.is_running())
    }

    /// Spawn the child and perform the handshake.
    ///
    /// A no-op when the session is already ready and the child alive. Any
    /// previous generation is torn down first.
    ///
    /// # Errors
    ///
    /// - `AppError::Launch`: the executable could not be spawned.
    /// - `AppError::Handshake`: the initialize exchange failed; the child
    ///   is terminated and the state left at `Failed`.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() == SessionState::Ready && self.is_running() {
            return Ok(());
        }
        self.teardown().await;
        self.last_id = 0;
        self.server_info = None;
        self.set_state(SessionState::Starting);

        let spawned = match supervisor::spawn(&self.config) {
            Ok(spawned) => spawned,
            Err(err) => {
                error!(server = self.server.as_str(), %err, "failed to start child server");
                self.set_state(SessionState::Failed);
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let (inbox_tx, inbox) = inbox::channel();
        let router = Router {
            server: self.server.clone(),
            strict: self.config.strict_stdout,
            max_line_bytes: self.config.max_line_bytes,
            inbox: inbox_tx,
            state: StateCell::clone(&self.state),
        };

        self.generation = Some(Generation {
            process: spawned.process,
            writer: FrameWriter::new(spawned.stdin),
            inbox,
            router: tokio::spawn(router.run(spawned.stdout, cancel.clone())),
            stderr_logger: tokio::spawn(run_stderr_logger(
                self.server.clone(),
                spawned.stderr,
                cancel.clone(),
            )),
            _cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
        });

        match self.handshake().await {
            Ok(()) => {
                self.generations_started += 1;
                info!(
                    server = self.server.as_str(),
                    generation = self.generations_started,
                    "handshake complete, session ready"
                );
                Ok(())
            }
            Err(err) => {
                warn!(server = self.server.as_str(), %err, "handshake failed");
                self.teardown().await;
                self.set_state(SessionState::Failed);
                Err(match err {
                    AppError::Handshake(_) => err,
                    other => AppError::Handshake(other.to_string()),
                })
            }
        }
    }

    /// Stop the child and reset the transport.
    ///
    /// Idempotent: stopping a stopped or never-started transport is a no-op
    /// apart from the state becoming `Stopped`.
    pub async fn stop(&mut self) {
        self.teardown().await;
        self.last_id = 0;
        self.server_info = None;
        self.set_state(SessionState::Stopped);
    }

    /// Send `method` and wait up to `timeout` for its response.
    ///
    /// # Errors
    ///
    /// - `AppError::NotInitialized`: the session is not ready.
    /// - `AppError::ProcessDied`: the child exited, closed stdout, or
    ///   refused the write.
    /// - `AppError::Timeout`: no matching response within `timeout`.
    /// - `AppError::Protocol`: the matching response could not be decoded.
    /// - `AppError::Config`: `timeout` is too large to schedule; nothing is
    ///   sent and no id is used.
    pub async fn call<P>(&mut self, method: &str, params: &P, timeout: Duration) -> Result<Response>
    where
        P: Serialize + ?Sized,
    {
        self.ensure_ready()?;
        self.exchange(method, params, timeout).await
    }

    /// Invoke a named operation and return its `result` payload.
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call), plus `AppError::Remote` when the child
    /// answers with an error object.
    pub async fn call_tool(&mut self, name: &str, arguments: &Value, timeout: Duration) -> Result<Value> {
        let params = OperationParams { name, arguments };
        self.call(CALL_OPERATION_METHOD, &params, timeout)
            .await?
            .into_result()
    }

    /// Invoke a named operation; `None` means "no usable result".
    ///
    /// Timeouts, process death, malformed replies, and calls on a session
    /// that is not ready all yield `None`. An error answer from the child is
    /// a usable result and comes back as `{"error": <error object>}`.
    pub async fn call_operation(
        &mut self,
        name: &str,
        arguments: &Value,
        timeout_seconds: f64,
    ) -> Option<Value> {
        let Ok(timeout) = Duration::try_from_secs_f64(timeout_seconds) else {
            warn!(server = self.server.as_str(), timeout_seconds, "invalid timeout");
            return None;
        };

        match self.call_tool(name, arguments, timeout).await {
            Ok(result) => Some(result),
            Err(AppError::Remote(err)) => {
                error!(server = self.server.as_str(), operation = name, error = %err, "operation returned an error");
                Some(json!({ "error": err }))
            }
            Err(err) => {
                warn!(server = self.server.as_str(), operation = name, %err, "operation produced no result");
                None
            }
        }
    }

    /// List the operations the child offers.
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call), plus `AppError::Remote` on an error answer.
    pub async fn list_operations(&mut self) -> Result<Vec<Value>> {
        let timeout = self.config.call_timeout();
        let result = self
            .call(LIST_OPERATIONS_METHOD, &Map::new(), timeout)
            .await?
            .into_result()?;

        Ok(result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(server = self.server.as_str(), from = %previous, to = %state, "session state changed");
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            SessionState::Ready => Ok(()),
            SessionState::Failed if self.generation.is_some() => Err(AppError::ProcessDied(
                "child closed its output stream".into(),
            )),
            other => Err(AppError::NotInitialized(format!("session is {other}"))),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        self.set_state(SessionState::AwaitingHandshake);

        let client = self.client.clone();
        let params = InitializeParams::from_config(&client);
        let timeout = self.config.handshake_timeout();

        let info = self
            .exchange(INITIALIZE_METHOD, &params, timeout)
            .await?
            .into_result()
            .map_err(|err| AppError::Handshake(format!("initialize rejected: {err}")))?;

        self.notify(INITIALIZED_NOTIFICATION, &Map::new()).await?;

        // The router may have seen EOF while we were writing the notification.
        let became_ready = self.state.send_if_modified(|state| {
            if *state == SessionState::AwaitingHandshake {
                *state = SessionState::Ready;
                true
            } else {
                false
            }
        });
        if !became_ready {
            return Err(AppError::Handshake(
                "child stream closed during handshake".into(),
            ));
        }

        self.server_info = Some(info);
        Ok(())
    }

    async fn notify<P>(&mut self, method: &str, params: &P) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        let generation = self
            .generation
            .as_mut()
            .ok_or_else(|| AppError::NotInitialized("no child process".into()))?;

        generation
            .writer
            .write_line(&Notification::new(method, params))
            .await
            .map_err(|err| AppError::ProcessDied(format!("failed to send {method}: {err}")))
    }

    async fn exchange<P>(&mut self, method: &str, params: &P, timeout: Duration) -> Result<Response>
    where
        P: Serialize + ?Sized,
    {
        let server = self.server.as_str();
        let poll = self.config.poll_interval();
        let generation = self
            .generation
            .as_mut()
            .ok_or_else(|| AppError::NotInitialized("no child process".into()))?;

        let started = Instant::now();
        let Some(deadline) = started.checked_add(timeout) else {
            warn!(server, method, ?timeout, "timeout out of range, request not sent");
            return Err(AppError::Config(format!(
                "timeout {timeout:?} for {method} is out of range"
            )));
        };

        self.last_id += 1;
        let id = self.last_id;

        generation
            .writer
            .write_line(&Request::new(id, method, params))
            .await
            .map_err(|err| AppError::ProcessDied(format!("failed to send {method}: {err}")))?;
        debug!(server, method, id, "request sent");

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                error!(server, method, id, elapsed_ms, "timeout waiting for response");
                return Err(AppError::Timeout(format!(
                    "no response to {method} (id {id}) within {timeout:?}"
                )));
            }

            match generation.inbox.pop(remaining.min(poll)).await {
                Popped::Message(value) => match message_id(&value) {
                    Some(received) if received == id => return Response::from_value(value),
                    Some(received) => {
                        warn!(server, method, expected = id, received, "discarding stale response");
                    }
                    None => {
                        debug!(server, method, message = %value, "discarding unsolicited message");
                    }
                },
                Popped::Empty => {
                    if !generation.process.is_running() {
                        return Err(AppError::ProcessDied(format!(
                            "child exited while waiting for {method} (id {id})"
                        )));
                    }
                }
                Popped::Closed => {
                    return Err(AppError::ProcessDied(format!(
                        "child closed stdout while waiting for {method} (id {id})"
                    )));
                }
            }
        }
    }

    async fn teardown(&mut self) {
        let Some(generation) = self.generation.take() else {
            return;
        };
        let Generation {
            process,
            writer,
            mut inbox,
            cancel,
            router,
            stderr_logger,
            _cancel_on_drop,
        } = generation;

        cancel.cancel();
        // Closing stdin is the first, gentlest shutdown request.
        drop(writer);

        let pid = process.id();
        let status = process.terminate(self.config.stop_grace()).await;

        for task in [router, stderr_logger] {
            if let Err(err) = task.await {
                debug!(server = self.server.as_str(), %err, "background task ended abnormally");
            }
        }

        let dropped = inbox.drain();
        if dropped > 0 {
            debug!(server = self.server.as_str(), dropped, "discarded undelivered messages");
        }

        info!(
            server = self.server.as_str(),
            pid = pid.unwrap_or(0),
            status = ?status,
            "child server stopped"
        );
    }
}

impl RecoverableTransport for RpcTransport {
    fn is_running(&mut self) -> bool {
        RpcTransport::is_running(self)
    }

    fn start(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(RpcTransport::start(self))
    }

    fn stop(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(RpcTransport::stop(self))
    }

    fn call_operation_once<'a>(
        &'a mut self,
        name: &'a str,
        arguments: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
        let timeout = self.config.call_timeout();
        Box::pin(self.call_tool(name, arguments, timeout))
    }
}
