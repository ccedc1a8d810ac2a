//! In-process update feed for single-node deployments and tests.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use relay_core::types::ResourceUpdate;

use super::update_bridge::UpdateBridge;

/// In-process stand-in for the Redis update channel.
#[derive(Debug, Clone)]
pub struct MemoryUpdateFeed {
    /// Raw payload sender.
    tx: broadcast::Sender<String>,
}

impl MemoryUpdateFeed {
    /// Create a feed buffering up to `buffer_size` unconsumed payloads.
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    /// Publish an update. Returns the number of active consumers.
    pub fn publish(&self, update: &ResourceUpdate) -> usize {
        match update.to_json() {
            Ok(payload) => self.publish_raw(payload),
            Err(e) => {
                warn!(key = %update.key, error = %e, "Failed to serialize update");
                0
            }
        }
    }

    /// Publish a raw payload exactly as a publisher would.
    pub fn publish_raw(&self, payload: impl Into<String>) -> usize {
        self.tx.send(payload.into()).unwrap_or(0)
    }

    /// Subscribe a raw receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Drain the feed into `bridge` until `shutdown` flips to `true`.
    ///
    /// The receiver is attached before the task is spawned, so payloads
    /// published after this call returns are never missed. Payloads are
    /// handled in order.
    pub fn spawn(
        &self,
        bridge: Arc<UpdateBridge>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let rx = self.tx.subscribe();
        tokio::spawn(Self::run(rx, bridge, shutdown))
    }

    async fn run(
        mut rx: broadcast::Receiver<String>,
        bridge: Arc<UpdateBridge>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(payload) => {
                        bridge.handle_payload(&payload).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Update feed lagged, payloads dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Memory update feed stopped");
    }
}
