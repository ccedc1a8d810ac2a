//! Replay of buffered updates onto a single connection.

use std::sync::Arc;

use tracing::{debug, warn};

use relay_core::result::AppResult;
use relay_core::traits::UpdateBuffer;

use crate::connection::handle::ConnectionHandle;
use crate::metrics::RelayMetrics;

/// Sends a user's buffered updates to one of their sockets.
#[derive(Debug, Clone)]
pub struct Hydrator {
    /// Per-user update buffer.
    buffer: Arc<dyn UpdateBuffer>,
    /// Metrics.
    metrics: Arc<RelayMetrics>,
}

impl Hydrator {
    /// Create a hydrator over `buffer`.
    pub fn new(buffer: Arc<dyn UpdateBuffer>, metrics: Arc<RelayMetrics>) -> Self {
        Self { buffer, metrics }
    }

    /// Send every buffered update newer than `since` to `handle`, oldest first.
    ///
    /// Frames bypass the hydration gate so they precede any parked live
    /// frames. Returns the number of frames queued.
    pub async fn replay(&self, handle: &ConnectionHandle, since: i64) -> AppResult<usize> {
        let mut updates = self
            .buffer
            .updates_since(&handle.user_id, since)
            .await
            .inspect_err(|_| self.metrics.store_failure())?;
        updates.sort_by_key(|u| u.timestamp);

        let mut sent = 0;
        for update in &updates {
            let text = match update.to_json() {
                Ok(t) => t,
                Err(e) => {
                    warn!(key = %update.key, error = %e, "Failed to serialize buffered update");
                    continue;
                }
            };
            if handle.send_replay(text) {
                sent += 1;
            } else if handle.is_closed() {
                break;
            }
        }

        self.metrics.replayed(sent);
        debug!(
            conn_id = %handle.id,
            user_id = %handle.user_id,
            since,
            sent,
            "Replayed buffered updates"
        );
        Ok(sent)
    }
}
