//! The `ResourceUpdate` event carried over pub/sub and WebSocket.

use serde::{Deserialize, Serialize};

/// A "something changed" notification for one resource key.
///
/// The relay never inspects or mutates the key; it only carries it from the
/// write-side publisher to interested clients, which re-fetch on their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceUpdate {
    /// Hierarchical resource path (e.g. `/api/workspaces/{id}/tasks/*/`).
    pub key: String,
    /// Time of the write, in epoch milliseconds.
    pub timestamp: i64,
}

impl ResourceUpdate {
    /// Create a new update.
    pub fn new(key: impl Into<String>, timestamp: i64) -> Self {
        Self {
            key: key.into(),
            timestamp,
        }
    }

    /// Wire form sent to clients: `{"key": ..., "timestamp": ...}`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
