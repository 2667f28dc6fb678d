//! Response router task.
//!
//! Reads newline-delimited JSON from the child's stdout and pushes every
//! decoded object onto the inbox, in arrival order. The router never looks
//! at `id` fields; matching responses to requests is the caller's job.
//!
//! | Inbound line            | Tolerant mode (default)      | Strict mode                     |
//! |-------------------------|------------------------------|---------------------------------|
//! | blank                   | skipped                      | skipped                         |
//! | JSON object             | pushed to inbox              | pushed to inbox                 |
//! | non-JSON / non-object   | dropped, logged at `DEBUG`   | session `Failed`, router stops  |
//! | longer than line limit  | dropped, logged at `WARN`    | dropped, logged at `WARN`       |
//!
//! When stdout reaches EOF the child has exited or crashed: the router marks
//! a live session `Failed` and returns, dropping its inbox sender so a waiting
//! caller observes the closure immediately.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::rpc::codec::FrameCodec;
use crate::rpc::framer::decode_line;
use crate::rpc::inbox::InboxSender;
use crate::rpc::session::SessionState;

/// Shared, observable session state.
pub type StateCell = Arc<watch::Sender<SessionState>>;

/// Everything one router task needs besides the stream itself.
#[derive(Debug)]
pub struct Router {
    /// Server kind, for log context.
    pub server: String,
    /// Reject non-JSON stdout instead of dropping it.
    pub strict: bool,
    /// Longest accepted line.
    pub max_line_bytes: usize,
    /// Producer half of the inbox.
    pub inbox: InboxSender,
    /// Session state, moved to `Failed` when the stream dies.
    pub state: StateCell,
}

impl Router {
    /// Drive the router until EOF, a fatal stream error, or cancellation.
    ///
    /// Cancellation exits without touching the session state; the caller is
    /// stopping the transport and sets the state itself.
    pub async fn run<R>(self, stdout: R, cancel: CancellationToken)
    where
        R: AsyncRead + Unpin + Send,
    {
        let server = self.server.as_str();
        let mut framed = FramedRead::new(stdout, FrameCodec::with_max_length(self.max_line_bytes));

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!(server, "rpc router: cancellation received, stopping");
                    break;
                }

                item = framed.next() => {
                    let skipped = framed.decoder_mut().take_skipped();
                    if skipped > 0 {
                        warn!(server, skipped, limit = self.max_line_bytes, "rpc router: oversized line dropped");
                    }

                    match item {
                        None => {
                            debug!(server, "rpc router: EOF detected");
                            mark_failed(&self.state);
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(server, error = %e, "rpc router: stream error, stopping");
                            mark_failed(&self.state);
                            break;
                        }

                        Some(Ok(line)) => match decode_line(&line) {
                            Ok(Some(value)) => {
                                if self.inbox.send(value).is_err() {
                                    debug!(server, "rpc router: inbox closed, stopping");
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) if self.strict => {
                                error!(
                                    server,
                                    error = %e,
                                    raw_line = %line,
                                    "rpc router: non-protocol output on stdout"
                                );
                                mark_failed(&self.state);
                                break;
                            }
                            Err(e) => {
                                debug!(server, error = %e, raw_line = %line, "rpc router: dropping non-json line");
                            }
                        },
                    }
                }
            }
        }
    }
}

/// Drain the child's stderr into `DEBUG` logs until EOF or cancellation.
///
/// Keeps the pipe from filling up and blocking a chatty child.
pub async fn run_stderr_logger<R>(server: String, stderr: R, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stderr, FrameCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            item = framed.next() => match item {
                None | Some(Err(_)) => break,
                Some(Ok(line)) => {
                    if !line.trim().is_empty() {
                        debug!(server = server.as_str(), line = line.trim_end(), "child stderr");
                    }
                }
            },
        }
    }
}

fn mark_failed(state: &StateCell) {
    state.send_if_modified(|current| {
        if current.is_live() {
            *current = SessionState::Failed;
            true
        } else {
            false
        }
    });
}
