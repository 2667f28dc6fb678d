//! Restart-once recovery around a single logical operation call.
//!
//! [`ensure_and_call`] is what domain-level callers use:
//!
//! 1. start the child if it is not running (a failed start is returned
//!    immediately);
//! 2. call the operation once;
//! 3. if the call produced no response at all (see
//!    [`AppError::warrants_restart`](crate::AppError::warrants_restart)),
//!    stop, start, and call again exactly once.
//!
//! Timeouts are not retried: the budget is already spent, and a slow
//! upstream is not assumed to be broken. The underlying call therefore runs
//! at most twice per logical invocation.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tracing::warn;

use crate::Result;

/// Transport surface the recovery policy drives.
///
/// Implemented by [`RpcTransport`](crate::rpc::client::RpcTransport); tests
/// substitute scripted fakes.
pub trait RecoverableTransport: Send {
    /// Whether the child process is alive.
    fn is_running(&mut self) -> bool;

    /// Launch the child and complete the handshake.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` or `AppError::Handshake` on failure.
    fn start(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Stop the child; idempotent.
    fn stop(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Call `name` once with the transport's default timeout.
    ///
    /// # Errors
    ///
    /// Any transport error; see [`AppError`](crate::AppError).
    fn call_operation_once<'a>(
        &'a mut self,
        name: &'a str,
        arguments: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;
}

/// Ensure the child is running, call `name`, and on "no response" restart
/// the child and retry exactly once.
///
/// # Errors
///
/// - start failures from the initial or the recovery start;
/// - [`AppError::Timeout`](crate::AppError::Timeout), `Protocol`, or
///   `Remote` from the first attempt (not retried);
/// - any error from the second attempt.
pub async fn ensure_and_call<T>(transport: &mut T, name: &str, arguments: &Value) -> Result<Value>
where
    T: RecoverableTransport + ?Sized,
{
    if !transport.is_running() {
        transport.start().await?;
    }

    match transport.call_operation_once(name, arguments).await {
        Err(err) if err.warrants_restart() => {
            warn!(operation = name, %err, "no response from child, restarting once");
            transport.stop().await;
            transport.start().await?;
            transport.call_operation_once(name, arguments).await
        }
        other => other,
    }
}

