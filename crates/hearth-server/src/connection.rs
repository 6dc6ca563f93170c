//! A live WebSocket connection as seen by the registries.
//!
//! Registries hold a [`ConnectionHandle`]; the socket task owns the matching
//! [`ConnectionOutbox`] and forwards whatever it yields to the client.
//! Closing a handle makes the outbox report end-of-stream, which the socket
//! task turns into a close frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of a best-effort send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Dropped,
}

impl Delivery {
    pub fn is_delivered(self) -> bool {
        self == Delivery::Delivered
    }
}

#[derive(Debug, Default)]
struct CloseSignal {
    closed: AtomicBool,
    notify: Notify,
}

/// Sending half of a live connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::Sender<String>,
    signal: Arc<CloseSignal>,
}

/// Receiving half, owned by the socket task.
#[derive(Debug)]
pub struct ConnectionOutbox {
    rx: mpsc::Receiver<String>,
    signal: Arc<CloseSignal>,
}

impl ConnectionHandle {
    /// Create a connection with room for `buffer` queued frames.
    pub fn new(buffer: usize) -> (ConnectionHandle, ConnectionOutbox) {
        let (tx, rx) = mpsc::channel(buffer);
        let signal = Arc::new(CloseSignal::default());
        (
            ConnectionHandle {
                id: Uuid::new_v4(),
                tx,
                signal: signal.clone(),
            },
            ConnectionOutbox { rx, signal },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Serialize `event` and queue it without waiting.
    pub fn try_send_json<T: Serialize>(&self, event: &T) -> Delivery {
        match hearth_shared::protocol::to_frame(event) {
            Ok(frame) => self.try_send_text(frame),
            Err(e) => {
                warn!(conn = %self.id, error = %e, "Failed to serialize event");
                Delivery::Dropped
            }
        }
    }

    /// Queue a text frame without waiting. A full or closed connection drops it.
    pub fn try_send_text(&self, frame: String) -> Delivery {
        if self.is_closed() {
            return Delivery::Dropped;
        }
        match self.tx.try_send(frame) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(conn = %self.id, "Dropping frame for slow connection");
                Delivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Dropped,
        }
    }

    /// Ask the socket task to close the connection.
    pub fn close(&self) {
        if !self.signal.closed.swap(true, Ordering::AcqRel) {
            // notify_one stores a permit if the outbox is not waiting yet.
            self.signal.notify.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.signal.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

impl ConnectionOutbox {
    /// Next queued frame, or `None` once the connection was closed or every
    /// handle was dropped.
    pub async fn recv(&mut self) -> Option<String> {
        if self.signal.closed.load(Ordering::Acquire) {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.signal.notify.notified() => None,
            frame = self.rx.recv() => frame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (handle, mut outbox) = ConnectionHandle::new(8);
        assert!(handle.try_send_text("a".into()).is_delivered());
        assert!(handle.try_send_text("b".into()).is_delivered());

        assert_eq!(outbox.recv().await.as_deref(), Some("a"));
        assert_eq!(outbox.recv().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_close_ends_outbox_and_drops_sends() {
        let (handle, mut outbox) = ConnectionHandle::new(8);
        handle.try_send_text("queued".into());
        handle.close();

        assert!(handle.is_closed());
        assert_eq!(outbox.recv().await, None);
        assert_eq!(handle.try_send_text("late".into()), Delivery::Dropped);
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_outbox() {
        let (handle, mut outbox) = ConnectionHandle::new(8);
        let waiter = tokio::spawn(async move { outbox.recv().await });

        tokio::task::yield_now().await;
        handle.close();

        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_full_buffer_drops() {
        let (handle, _outbox) = ConnectionHandle::new(1);
        assert_eq!(handle.try_send_text("1".into()), Delivery::Delivered);
        assert_eq!(handle.try_send_text("2".into()), Delivery::Dropped);
    }

    #[tokio::test]
    async fn test_dropped_outbox_reports_closed() {
        let (handle, outbox) = ConnectionHandle::new(4);
        drop(outbox);
        assert!(handle.is_closed());
        assert_eq!(
            handle.try_send_json(&serde_json::json!({"x": 1})),
            Delivery::Dropped
        );
    }
}
