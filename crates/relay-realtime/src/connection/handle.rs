//! Individual WebSocket connection handle.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use relay_core::types::UserId;

/// Unique connection identifier
pub type ConnectionId = Uuid;

/// A frame queued for the socket writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Text frame (JSON update or `"pong"`).
    Text(String),
    /// Protocol-level ping.
    Ping,
    /// Close the socket.
    Close,
}

/// A handle to a single WebSocket connection.
///
/// Holds the sender channel for pushing frames to the socket writer, the
/// liveness flag driven by the heartbeat, and the hydration gate.
///
/// A new handle starts *hydrating*: live text frames are held back until
/// [`ConnectionHandle::mark_ready`] so buffered updates replay first. A
/// parked frame identical to one already replayed is dropped on release.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Unique connection ID
    pub id: ConnectionId,
    /// User who owns this connection
    pub user_id: UserId,
    /// Sender for outbound frames
    sender: mpsc::Sender<OutboundFrame>,
    /// When the connection was established
    pub connected_at: DateTime<Utc>,
    /// Set by pongs, cleared by each heartbeat sweep
    alive: AtomicBool,
    /// Set once the socket is being torn down
    closed: AtomicBool,
    /// Whether hydration has finished
    ready: AtomicBool,
    /// Live frames received while hydrating
    pending: Mutex<Vec<String>>,
    /// Frames replayed while hydrating
    replayed: Mutex<HashSet<String>>,
    /// Wakes the socket reader when the server terminates the connection
    terminated: Notify,
}

impl ConnectionHandle {
    /// Create a new connection handle
    pub fn new(user_id: UserId, sender: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            sender,
            connected_at: Utc::now(),
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
            replayed: Mutex::new(HashSet::new()),
            terminated: Notify::new(),
        }
    }

    /// Queue a live text frame.
    ///
    /// While hydrating the frame is parked and flushed by `mark_ready`.
    /// Returns `false` if the frame could not be queued.
    pub fn send_text(&self, text: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        if !self.ready.load(Ordering::Acquire) {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            // Re-check under the lock: mark_ready flips the flag while holding it.
            if !self.ready.load(Ordering::Acquire) {
                pending.push(text.to_string());
                return true;
            }
        }
        self.deliver(OutboundFrame::Text(text.to_string()))
    }

    /// Queue a frame, bypassing the hydration gate.
    pub fn deliver(&self, frame: OutboundFrame) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.sender.try_send(frame) {
            Ok(_) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    conn_id = %self.id,
                    user_id = %self.user_id,
                    "Connection send buffer full, dropping frame"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.closed.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    /// Queue a replayed frame ahead of any parked live frames.
    ///
    /// While hydrating, the text is remembered so `mark_ready` can skip a
    /// parked copy of it.
    pub fn send_replay(&self, text: String) -> bool {
        if !self.is_ready() {
            self.replayed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(text.clone());
        }
        self.deliver(OutboundFrame::Text(text))
    }

    /// End hydration and flush any live frames that arrived meanwhile.
    pub fn mark_ready(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let replayed =
            std::mem::take(&mut *self.replayed.lock().unwrap_or_else(|e| e.into_inner()));
        for text in pending.drain(..) {
            if !replayed.contains(&text) {
                self.deliver(OutboundFrame::Text(text));
            }
        }
        self.ready.store(true, Ordering::Release);
    }

    /// Whether hydration has finished.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Record a pong (or any other liveness signal).
    pub fn record_pong(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Clear the liveness flag, returning its previous value.
    ///
    /// Used by the heartbeat sweep: `false` means no pong arrived since the
    /// previous sweep.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }

    /// Check the liveness flag without clearing it.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Whether the connection is being torn down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Terminate the connection from the server side.
    ///
    /// Queues a close frame and wakes the socket reader. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.sender.try_send(OutboundFrame::Close);
        self.terminated.notify_one();
    }

    /// Resolves once [`ConnectionHandle::close`] has been called.
    pub async fn terminated(&self) {
        self.terminated.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_handle(capacity: usize) -> (ConnectionHandle, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ConnectionHandle::new(UserId::new("u1"), tx), rx)
    }

    #[test]
    fn test_live_frames_wait_for_hydration() {
        let (handle, mut rx) = make_handle(8);

        assert!(handle.send_text("live-1"));
        assert!(rx.try_recv().is_err());

        assert!(handle.deliver(OutboundFrame::Text("replay".into())));
        handle.mark_ready();
        assert!(handle.send_text("live-2"));

        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Text("replay".into()));
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Text("live-1".into()));
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Text("live-2".into()));
    }

    #[test]
    fn test_parked_copy_of_replayed_frame_is_dropped() {
        let (handle, mut rx) = make_handle(8);
        let same = r#"{"key":"/k/","timestamp":5}"#;

        assert!(handle.send_text(same));
        assert!(handle.send_text("other"));
        assert!(handle.send_replay(same.to_string()));
        handle.mark_ready();

        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Text(same.into()));
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Text("other".into()));
        assert!(rx.try_recv().is_err());

        // After hydration the same text is a new publish and goes through.
        assert!(handle.send_text(same));
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Text(same.into()));
    }

    #[test]
    fn test_take_alive_two_strikes() {
        let (handle, _rx) = make_handle(8);
        assert!(handle.take_alive());
        assert!(!handle.take_alive());
        handle.record_pong();
        assert!(handle.take_alive());
    }

    #[test]
    fn test_close_is_idempotent_and_queues_close_frame() {
        let (handle, mut rx) = make_handle(8);
        handle.close();
        handle.close();
        assert!(handle.is_closed());
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::Close);
        assert!(rx.try_recv().is_err());
        assert!(!handle.deliver(OutboundFrame::Ping));
    }

    #[test]
    fn test_dropped_receiver_marks_closed() {
        let (handle, rx) = make_handle(8);
        handle.mark_ready();
        drop(rx);
        assert!(!handle.send_text("x"));
        assert!(handle.is_closed());
    }

    #[test]
    fn test_full_buffer_drops_frame() {
        let (handle, _rx) = make_handle(1);
        handle.mark_ready();
        assert!(handle.send_text("a"));
        assert!(!handle.send_text("b"));
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn test_terminated_resolves_after_close() {
        let (handle, _rx) = make_handle(8);
        handle.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle.terminated())
            .await
            .unwrap();
    }
}
