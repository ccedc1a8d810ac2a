//! Redis pub/sub subscription feeding the update bridge.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{error, info, warn};

use relay_core::error::{AppError, ErrorKind};
use relay_core::result::AppResult;

use super::update_bridge::UpdateBridge;

/// Why a subscription session ended.
enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// Subscribes to the update channel and hands every message to the bridge.
///
/// The subscription is re-established after a fixed delay whenever the
/// connection drops; updates published in the gap are only recoverable
/// through the per-user buffers.
#[derive(Debug, Clone)]
pub struct RedisUpdateFeed {
    /// Redis client (pub/sub needs its own connection).
    client: redis::Client,
    /// Channel name.
    channel: String,
    /// Fan-out target.
    bridge: Arc<UpdateBridge>,
    /// Delay between subscription attempts.
    resubscribe_delay: Duration,
}

impl RedisUpdateFeed {
    /// Creates a new feed.
    pub fn new(
        client: redis::Client,
        channel: impl Into<String>,
        bridge: Arc<UpdateBridge>,
        resubscribe_delay: Duration,
    ) -> Self {
        Self {
            client,
            channel: channel.into(),
            bridge,
            resubscribe_delay,
        }
    }

    /// Consume the channel until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            match self.session(&mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Disconnected) => {
                    warn!(channel = %self.channel, "Pub/sub connection lost");
                }
                Err(e) => {
                    error!(channel = %self.channel, error = %e, "Pub/sub subscribe failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            info!(channel = %self.channel, "Re-subscribing to update channel");
        }

        info!(channel = %self.channel, "Update feed stopped");
    }

    async fn session(&self, shutdown: &mut watch::Receiver<bool>) -> AppResult<SessionEnd> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            AppError::with_source(ErrorKind::Connection, "Failed to open pub/sub connection", e)
        })?;
        pubsub.subscribe(&self.channel).await.map_err(|e| {
            AppError::with_source(ErrorKind::Connection, "Failed to subscribe", e)
        })?;
        info!(channel = %self.channel, "Subscribed to update channel");

        let mut messages = pubsub.on_message();
        loop {
            tokio::select! {
                msg = messages.next() => {
                    let Some(msg) = msg else {
                        return Ok(SessionEnd::Disconnected);
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(error = %e, "Skipping non-text pub/sub payload");
                            continue;
                        }
                    };
                    // Sequential, so the writer queue sees a key in publish order.
                    self.bridge.handle_payload(&payload).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            }
        }
    }
}
