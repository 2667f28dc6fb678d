//! Line framer: one JSON value per `\n`-terminated line.
//!
//! Outbound values are serialised compactly (string contents escape any
//! newline, so the encoded text never contains a raw `\n`), terminated by a
//! single `\n`, and flushed immediately. Inbound lines are classified by
//! [`decode_line`]; the router decides whether noise is tolerated.

use futures_util::SinkExt;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;

use crate::rpc::codec::FrameCodec;
use crate::{AppError, Result};

/// Writes framed JSON lines to a child's stdin.
#[derive(Debug)]
pub struct FrameWriter<W> {
    sink: FramedWrite<W, FrameCodec>,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wrap a writer.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            sink: FramedWrite::new(writer, FrameCodec::new()),
        }
    }

    /// Serialise `value` to one line, write it, and flush.
    ///
    /// # Errors
    ///
    /// - [`AppError::Protocol`] if `value` cannot be serialised.
    /// - [`AppError::Io`] if the write or flush fails (typically a closed
    ///   pipe because the child exited).
    pub async fn write_line<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let line = serde_json::to_string(value)
            .map_err(|e| AppError::Protocol(format!("failed to serialise outbound message: {e}")))?;

        // `send` flushes the sink after buffering the frame.
        self.sink.send(line).await
    }
}

/// Classify one inbound line.
///
/// - `Ok(None)`: blank or whitespace-only line.
/// - `Ok(Some(value))`: a JSON object.
/// - `Err(AppError::Protocol(...))`: not JSON, or JSON that is not an object.
///
/// # Errors
///
/// See above; callers decide whether the error is fatal.
pub fn decode_line(line: &str) -> Result<Option<Value>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

    if value.is_object() {
        Ok(Some(value))
    } else {
        Err(AppError::Protocol("expected a json object".into()))
    }
}
