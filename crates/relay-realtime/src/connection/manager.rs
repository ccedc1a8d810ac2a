//! Connection lifecycle: register, hydrate, inbound message routing,
//! unregister.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use relay_core::config::RealtimeConfig;
use relay_core::traits::PushSubscriptionStore;
use relay_core::types::UserId;

use crate::hydration::Hydrator;
use crate::message::types::{ClientMessage, InboundFrame, PONG, parse_inbound};
use crate::metrics::RelayMetrics;

use super::handle::{ConnectionHandle, OutboundFrame};
use super::registry::ConnectionRegistry;

/// Manages the lifecycle of every WebSocket connection.
#[derive(Debug)]
pub struct ConnectionManager {
    /// Live connections.
    registry: Arc<ConnectionRegistry>,
    /// Buffered-update replay.
    hydrator: Hydrator,
    /// Push subscription storage.
    subscriptions: Arc<dyn PushSubscriptionStore>,
    /// Metrics.
    metrics: Arc<RelayMetrics>,
    /// Configuration.
    config: RealtimeConfig,
}

impl ConnectionManager {
    /// Creates a new connection manager.
    pub fn new(
        config: RealtimeConfig,
        registry: Arc<ConnectionRegistry>,
        hydrator: Hydrator,
        subscriptions: Arc<dyn PushSubscriptionStore>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            registry,
            hydrator,
            subscriptions,
            metrics,
            config,
        }
    }

    /// Registers a new authenticated connection in the hydrating state.
    ///
    /// Live updates for the user are parked on the handle from this point
    /// on, so none are lost between registration and [`Self::hydrate`].
    /// Returns the handle and the receiver the socket writer drains.
    pub fn register(&self, user_id: UserId) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(self.config.channel_buffer_size.max(1));
        let handle = Arc::new(ConnectionHandle::new(user_id, tx));

        self.registry.add(handle.clone());
        self.metrics.connection_opened();

        info!(
            conn_id = %handle.id,
            user_id = %handle.user_id,
            "WebSocket connection registered"
        );

        (handle, rx)
    }

    /// Replay the user's buffered updates, then release parked live frames.
    ///
    /// A store failure is logged and the connection proceeds with live
    /// delivery only.
    pub async fn hydrate(&self, handle: &ConnectionHandle) {
        if let Err(e) = self.hydrator.replay(handle, 0).await {
            warn!(
                conn_id = %handle.id,
                user_id = %handle.user_id,
                error = %e,
                "Hydration failed, continuing with live updates"
            );
        }
        handle.mark_ready();
    }

    /// Unregisters a connection. Called once when its socket ends.
    pub fn unregister(&self, handle: &ConnectionHandle) {
        handle.close();
        // Already gone if the heartbeat evicted it.
        let removed = self.registry.remove(&handle.user_id, &handle.id).is_some();
        self.metrics.connection_closed();

        info!(
            conn_id = %handle.id,
            user_id = %handle.user_id,
            evicted = !removed,
            connected_secs = (chrono::Utc::now() - handle.connected_at).num_seconds(),
            "WebSocket connection unregistered"
        );
    }

    /// Record a protocol-level pong.
    pub fn record_pong(&self, handle: &ConnectionHandle) {
        handle.record_pong();
    }

    /// Processes an inbound text frame from a client.
    pub async fn handle_inbound(&self, handle: &ConnectionHandle, raw: &str) {
        let frame = match parse_inbound(raw) {
            Ok(f) => f,
            Err(e) => {
                warn!(conn_id = %handle.id, error = %e, "Ignoring unrecognized client message");
                return;
            }
        };

        match frame {
            InboundFrame::Ping => {
                // An application ping proves the client is alive too.
                handle.record_pong();
                handle.deliver(OutboundFrame::Text(PONG.to_string()));
            }
            InboundFrame::Message(ClientMessage::Subscribe { subscription }) => {
                self.store_subscription(handle, &subscription).await;
            }
            InboundFrame::Message(ClientMessage::Sync { timestamp }) => {
                match self.hydrator.replay(handle, timestamp).await {
                    Ok(sent) => {
                        debug!(conn_id = %handle.id, since = timestamp, sent, "Sync served")
                    }
                    Err(e) => warn!(conn_id = %handle.id, error = %e, "Sync failed"),
                }
            }
        }
    }

    async fn store_subscription(&self, handle: &ConnectionHandle, subscription: &serde_json::Value) {
        match self
            .subscriptions
            .store_subscription(&handle.user_id, subscription)
            .await
        {
            Ok(()) => debug!(user_id = %handle.user_id, "Stored push subscription"),
            Err(e) => {
                self.metrics.store_failure();
                warn!(user_id = %handle.user_id, error = %e, "Failed to store push subscription");
            }
        }
    }

    /// Close every connection (graceful shutdown).
    pub fn close_all(&self) -> usize {
        let handles = self.registry.drain();
        for handle in &handles {
            handle.close();
        }
        info!(count = handles.len(), "Closed all WebSocket connections");
        handles.len()
    }

    /// The registry this manager maintains.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}
