//! Inbound update handling shared by the socket and the push path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use relay_core::types::ResourceUpdate;

use crate::dedup::UpdateDeduplicator;
use crate::router::{MessageRouter, RefreshTarget, StoreRefresher};
use crate::state::UiStatus;
use crate::watermark::WatermarkStore;

/// Server reply to the keepalive ping.
pub const PONG: &str = "pong";

/// What became of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Not an update (pong, echoed control frame, unparseable text).
    Ignored,
    /// Same key and timestamp already handled inside the dedup window.
    Duplicate,
    /// No route claims the key.
    Unrouted,
    /// The matching store was refreshed.
    Refreshed(RefreshTarget),
    /// The refresh failed; the watermark was left alone.
    Failed,
}

/// Routes updates to store refreshes and maintains the watermark.
#[derive(Debug)]
pub struct UpdateProcessor {
    router: MessageRouter,
    refresher: Arc<dyn StoreRefresher>,
    watermark: Arc<dyn WatermarkStore>,
    dedup: UpdateDeduplicator,
    status: watch::Sender<UiStatus>,
}

impl UpdateProcessor {
    /// Create a processor.
    pub fn new(
        router: MessageRouter,
        refresher: Arc<dyn StoreRefresher>,
        watermark: Arc<dyn WatermarkStore>,
        dedup_window: Duration,
    ) -> Self {
        let (status, _) = watch::channel(UiStatus::Disconnected);
        Self {
            router,
            refresher,
            watermark,
            dedup: UpdateDeduplicator::new(dedup_window),
            status,
        }
    }

    /// Subscribe to UI status changes.
    pub fn status(&self) -> watch::Receiver<UiStatus> {
        self.status.subscribe()
    }

    /// The watermark store.
    pub fn watermark(&self) -> &Arc<dyn WatermarkStore> {
        &self.watermark
    }

    pub(crate) fn set_status(&self, status: UiStatus) {
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    /// `Connecting` / `Syncing` → `Idle`; other states are kept.
    pub(crate) fn clear_pending_status(&self) {
        self.status.send_if_modified(|current| {
            if matches!(current, UiStatus::Connecting | UiStatus::Syncing) {
                *current = UiStatus::Idle;
                true
            } else {
                false
            }
        });
    }

    /// Handle one text frame from the socket.
    pub async fn handle_text(&self, raw: &str) -> ProcessOutcome {
        if raw.trim() == PONG {
            return ProcessOutcome::Ignored;
        }

        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Ignoring non-JSON frame");
                return ProcessOutcome::Ignored;
            }
        };
        self.handle_value(value).await
    }

    /// Handle an update delivered through the push channel.
    pub async fn handle_push_payload(&self, payload: Value) -> ProcessOutcome {
        self.handle_value(payload).await
    }

    async fn handle_value(&self, value: Value) -> ProcessOutcome {
        // Echoed control messages carry a `type`.
        if value.get("type").is_some() {
            debug!("Ignoring control frame");
            return ProcessOutcome::Ignored;
        }

        match serde_json::from_value::<ResourceUpdate>(value) {
            Ok(update) => self.process(update).await,
            Err(e) => {
                warn!(error = %e, "Ignoring frame that is not a resource update");
                ProcessOutcome::Ignored
            }
        }
    }

    /// Route one update and advance the watermark on success.
    pub async fn process(&self, update: ResourceUpdate) -> ProcessOutcome {
        if !self.dedup.should_process(&update) {
            debug!(key = %update.key, timestamp = update.timestamp, "Duplicate update skipped");
            return ProcessOutcome::Duplicate;
        }

        match self.router.dispatch(&update.key, self.refresher.as_ref()).await {
            Ok(Some(target)) => {
                if let Err(e) = self.watermark.advance(update.timestamp).await {
                    warn!(timestamp = update.timestamp, error = %e, "Failed to persist watermark");
                }
                self.clear_pending_status();
                ProcessOutcome::Refreshed(target)
            }
            Ok(None) => {
                info!(key = %update.key, "Unhandled resource key");
                ProcessOutcome::Unrouted
            }
            Err(e) => {
                self.dedup.forget(&update);
                warn!(key = %update.key, error = %e, "Store refresh failed");
                ProcessOutcome::Failed
            }
        }
    }
}
