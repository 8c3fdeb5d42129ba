//! Subscriber handle
//!
//! A `SinkHandle` is the registrar-side half of a subscriber: the session
//! keeps the receiving end, the handle owns the only sender. Dropping or
//! closing the handle is therefore the one and only way the session learns
//! that its registrar let go of it.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::message::{Message, SinkId};

/// Why a message could not be handed to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// Bounded buffer is full (only reported by non-blocking sends)
    Full,
    /// Receiver is gone or the handle was already closed
    Closed,
}

/// Registrar-owned endpoint of one downstream consumer
#[derive(Debug)]
pub struct SinkHandle {
    id: SinkId,
    tx: Option<mpsc::Sender<Message>>,
    saturated: AtomicBool,
}

impl SinkHandle {
    /// Create a handle together with the receiver its session drains
    ///
    /// A zero buffer size is raised to one.
    pub fn channel(id: SinkId, buffer_size: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        (
            Self {
                id,
                tx: Some(tx),
                saturated: AtomicBool::new(false),
            },
            rx,
        )
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Whether this handle can no longer deliver
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }

    /// Deliver a message, waiting for buffer space
    pub(crate) async fn send(&self, message: Message) -> Result<(), SendFailure> {
        let tx = self.tx.as_ref().ok_or(SendFailure::Closed)?;
        tx.send(message).await.map_err(|_| SendFailure::Closed)
    }

    /// Deliver a message without waiting
    pub(crate) fn try_send(&self, message: Message) -> Result<(), SendFailure> {
        let tx = self.tx.as_ref().ok_or(SendFailure::Closed)?;
        tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => SendFailure::Full,
            TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// Record whether the last non-blocking send found the buffer full
    ///
    /// Returns `true` when this flips the recorded state.
    pub(crate) fn mark_saturated(&self, full: bool) -> bool {
        self.saturated.swap(full, Ordering::Relaxed) != full
    }

    /// Close the outbound channel
    ///
    /// Returns `true` only for the call that actually closed it.
    pub(crate) fn close(&mut self) -> bool {
        self.tx.take().is_some()
    }
}
