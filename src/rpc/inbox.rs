//! Inbox: the hand-off between the response router and the caller.
//!
//! An unbounded, order-preserving tokio [`mpsc`] channel. The router task is
//! the only producer; the transport that owns the [`Inbox`] is the only
//! consumer. When the router finishes (child stdout closed) its sender is
//! dropped and [`Inbox::pop`] reports [`Popped::Closed`] once the queue is
//! empty.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

/// Producer half, owned by the response router.
pub type InboxSender = mpsc::UnboundedSender<Value>;

/// Result of one bounded wait on the inbox.
#[derive(Debug, Clone, PartialEq)]
pub enum Popped {
    /// The next decoded message.
    Message(Value),
    /// Nothing arrived within the wait slice.
    Empty,
    /// The producer is gone and nothing is left to read.
    Closed,
}

/// Consumer half of the inbox.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Value>,
}

/// Create a connected sender / inbox pair.
#[must_use]
pub fn channel() -> (InboxSender, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Inbox { rx })
}

impl Inbox {
    /// Wait up to `slice` for the next message.
    pub async fn pop(&mut self, slice: Duration) -> Popped {
        match tokio::time::timeout(slice, self.rx.recv()).await {
            Ok(Some(value)) => Popped::Message(value),
            Ok(None) => Popped::Closed,
            Err(_elapsed) => Popped::Empty,
        }
    }

    /// Discard every queued message, returning how many were dropped.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Number of messages waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no message is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
