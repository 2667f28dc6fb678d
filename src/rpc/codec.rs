//! Newline framing codec for child stdio streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length so an unterminated or oversized line from a misbehaving child
//! cannot exhaust memory.
//!
//! # Usage
//!
//! Use [`FrameCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (child stdout) and
//! [`tokio_util::codec::FramedWrite`] (child stdin). Both directions frame
//! UTF-8 lines delimited by `\n`.
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use tool_conduit::rpc::codec::FrameCodec;
//!
//! let lines = FramedRead::new(child_stdout, FrameCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Default maximum line length accepted from a child: 8 MiB.
///
/// Tool results can carry large listings, so the limit is generous; it only
/// guards against a child that never emits a newline.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Line codec for child stdio streams.
///
/// Inbound lines longer than the configured limit are discarded up to the
/// next newline and counted; decoding carries on with the following line,
/// so a [`FramedRead`](tokio_util::codec::FramedRead) never pauses on them.
/// Read the count with [`take_skipped`](Self::take_skipped). I/O errors map
/// to [`AppError::Io`].
///
/// Outbound strings are encoded as `item\n`. The limit is a decoder-side
/// concern and is not enforced during encoding.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LinesCodec,
    max_length: usize,
    skipped: usize,
}

impl FrameCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec rejecting inbound lines longer than `max_length` bytes.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
            skipped: 0,
        }
    }

    /// Inbound line limit in bytes.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Number of oversized lines dropped since the last call; resets the count.
    pub fn take_skipped(&mut self) -> usize {
        std::mem::take(&mut self.skipped)
    }

    fn map_error(&self, err: LinesCodecError) -> AppError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => AppError::Protocol(format!(
                "line too long: exceeded {} bytes",
                self.max_length
            )),
            LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            // After reporting an overlong line the inner codec is in discard
            // mode, so the next call always makes progress.
            match self.inner.decode(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => self.skipped += 1,
                other => return other.map_err(|e| self.map_error(e)),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode_eof(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => self.skipped += 1,
                other => return other.map_err(|e| self.map_error(e)),
            }
        }
    }
}

impl Encoder<String> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.inner.encode(item, dst).map_err(|e| self.map_error(e))
    }
}
