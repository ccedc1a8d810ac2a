//! Push subscription registration over the live socket.

use std::sync::Mutex;

use serde_json::{Value, json};

/// Holds the installation's push subscription until the server has it.
///
/// The subscription is sent once. If the socket is down when it is
/// registered it waits for the next open instead of being dropped.
#[derive(Debug, Default)]
pub struct PushRegistrationBridge {
    inner: Mutex<PushState>,
}

#[derive(Debug, Default)]
struct PushState {
    subscription: Option<Value>,
    delivered: bool,
}

impl PushRegistrationBridge {
    /// Create an empty bridge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the platform's subscription. Re-registering the same
    /// descriptor after delivery is a no-op.
    pub fn register(&self, subscription: Value) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if state.delivered && state.subscription.as_ref() == Some(&subscription) {
            return;
        }
        state.subscription = Some(subscription);
        state.delivered = false;
    }

    /// The `subscribe` frame to send, if one is still owed to the server.
    pub fn pending_frame(&self) -> Option<String> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if state.delivered {
            return None;
        }
        state
            .subscription
            .as_ref()
            .map(|subscription| json!({ "type": "subscribe", "subscription": subscription }).to_string())
    }

    /// The frame returned by [`Self::pending_frame`] was written.
    pub fn mark_delivered(&self) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if state.subscription.is_some() {
            state.delivered = true;
        }
    }
}
