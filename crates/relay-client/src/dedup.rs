//! Suppression of repeated updates inside a time window.
//!
//! Hydration on connect and the client's own `sync` right after overlap,
//! so the same `(key, timestamp)` commonly arrives twice.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use relay_core::types::ResourceUpdate;

type DedupKey = (String, i64);

/// Remembers recently processed updates.
#[derive(Debug)]
pub struct UpdateDeduplicator {
    /// Window duration
    window: Duration,
    /// First-seen time per update
    last_seen: Mutex<HashMap<DedupKey, Instant>>,
}

impl UpdateDeduplicator {
    /// Create a deduplicator with the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if the update should be processed, `false` if the same
    /// key and timestamp was seen inside the window.
    pub fn should_process(&self, update: &ResourceUpdate) -> bool {
        let mut map = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let key = (update.key.clone(), update.timestamp);

        if let Some(last) = map.get(&key) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }

        map.insert(key, now);
        if map.len() > 1024 {
            let cutoff = self.window;
            map.retain(|_, seen| now.duration_since(*seen) < cutoff);
        }
        true
    }

    /// Drop an update from the window so a later copy is processed again.
    pub fn forget(&self, update: &ResourceUpdate) {
        let mut map = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(&(update.key.clone(), update.timestamp));
    }
}
