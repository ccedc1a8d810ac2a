//! `ResourceUpdate` → interested users → live sockets and buffers.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use relay_core::error::AppError;
use relay_core::traits::InterestIndex;
use relay_core::types::ResourceUpdate;

use super::buffer_writer::BufferWriter;
use crate::connection::registry::ConnectionRegistry;
use crate::metrics::RelayMetrics;

/// What happened to one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Users in the key's interest set.
    pub interested: usize,
    /// Sockets the update was queued on.
    pub delivered: usize,
    /// Whether the buffer and timestamp writes were queued.
    pub persisted: bool,
}

/// Fans each update out to the users interested in its key.
///
/// Connected sockets get the update first; the per-user buffer writes are
/// then handed to the [`BufferWriter`] so a slow store never holds up
/// live delivery. A socket that is hydrating parks the live frame until
/// its replay is done.
#[derive(Debug)]
pub struct UpdateBridge {
    /// Resource-interest index.
    interests: Arc<dyn InterestIndex>,
    /// Background buffer writes.
    writer: Arc<BufferWriter>,
    /// Live connections.
    registry: Arc<ConnectionRegistry>,
    /// Metrics.
    metrics: Arc<RelayMetrics>,
    /// Cap on the interest lookup.
    lookup_timeout: Duration,
}

impl UpdateBridge {
    /// Create a new bridge
    pub fn new(
        interests: Arc<dyn InterestIndex>,
        writer: Arc<BufferWriter>,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<RelayMetrics>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            interests,
            writer,
            registry,
            metrics,
            lookup_timeout,
        }
    }

    /// The writer persisting fanned-out updates.
    pub fn writer(&self) -> &Arc<BufferWriter> {
        &self.writer
    }

    /// Parse a raw pub/sub payload and fan it out.
    ///
    /// Malformed payloads are logged and skipped.
    pub async fn handle_payload(&self, payload: &str) -> Option<FanoutReport> {
        match serde_json::from_str::<ResourceUpdate>(payload) {
            Ok(update) => Some(self.handle_update(update).await),
            Err(e) => {
                self.metrics.update_malformed();
                warn!(error = %e, payload_len = payload.len(), "Skipping malformed update payload");
                None
            }
        }
    }

    /// Fan out one update.
    ///
    /// Waits on the interest lookup only; buffer writes run in the background.
    pub async fn handle_update(&self, update: ResourceUpdate) -> FanoutReport {
        self.metrics.update_received();
        let mut report = FanoutReport::default();

        let lookup = tokio::time::timeout(
            self.lookup_timeout,
            self.interests.interested_users(&update.key),
        )
        .await
        .unwrap_or_else(|_| Err(AppError::cache("Interest lookup timed out")));
        let users = match lookup {
            Ok(users) => users,
            Err(e) => {
                self.metrics.store_failure();
                warn!(key = %update.key, error = %e, "Interest lookup failed, dropping update");
                report.persisted = self.writer.enqueue(Vec::new(), update);
                return report;
            }
        };
        report.interested = users.len();

        if users.is_empty() {
            debug!(key = %update.key, "No interested users");
        } else {
            match update.to_json() {
                Ok(text) => {
                    for user in &users {
                        report.delivered += self.registry.broadcast(user, &text);
                    }
                    self.metrics.delivered(report.delivered);
                }
                Err(e) => {
                    warn!(key = %update.key, error = %e, "Failed to serialize update");
                }
            }
        }

        debug!(
            key = %update.key,
            timestamp = update.timestamp,
            interested = report.interested,
            delivered = report.delivered,
            "Update fanned out"
        );
        report.persisted = self.writer.enqueue(users, update);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::handle::{ConnectionHandle, OutboundFrame};
    use async_trait::async_trait;
    use relay_cache::memory::MemoryStore;
    use relay_core::result::AppResult;
    use relay_core::traits::UpdateBuffer;
    use relay_core::types::UserId;
    use tokio::sync::{mpsc, watch};

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    const COMMENTS: &str = "/api/workspaces/W/tasks/T/comments/*/";

    struct Harness {
        bridge: UpdateBridge,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<RelayMetrics>,
        _shutdown: watch::Sender<bool>,
    }

    fn bridge_with(interests: Arc<dyn InterestIndex>, buffer: Arc<dyn UpdateBuffer>) -> Harness {
        let metrics = Arc::new(RelayMetrics::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let writer = Arc::new(BufferWriter::new(
            interests.clone(),
            buffer,
            metrics.clone(),
            64,
            Duration::from_millis(200),
        ));
        let (shutdown, rx) = watch::channel(false);
        writer.spawn(rx);
        let bridge = UpdateBridge::new(
            interests,
            writer,
            registry.clone(),
            metrics.clone(),
            Duration::from_millis(200),
        );
        Harness {
            bridge,
            registry,
            metrics,
            _shutdown: shutdown,
        }
    }

    fn bridge_over(store: Arc<MemoryStore>) -> Harness {
        bridge_with(store.clone(), store)
    }

    fn connect(registry: &ConnectionRegistry, user: &str) -> mpsc::Receiver<OutboundFrame> {
        let (tx, rx) = mpsc::channel(16);
        let handle = Arc::new(ConnectionHandle::new(UserId::new(user), tx));
        handle.mark_ready();
        registry.add(handle);
        rx
    }

    #[tokio::test]
    async fn test_online_and_offline_users() {
        let store = Arc::new(MemoryStore::default());
        store.add_interest(COMMENTS, UserId::new("a"));
        store.add_interest(COMMENTS, UserId::new("b"));
        let h = bridge_over(store.clone());
        let mut rx_a = connect(&h.registry, "a");
        let ts = now_ms();

        let report = h
            .bridge
            .handle_update(ResourceUpdate::new(COMMENTS, ts))
            .await;

        assert_eq!(report, FanoutReport { interested: 2, delivered: 1, persisted: true });
        let OutboundFrame::Text(text) = rx_a.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        let received: ResourceUpdate = serde_json::from_str(&text).unwrap();
        assert_eq!(received, ResourceUpdate::new(COMMENTS, ts));

        assert!(h.bridge.writer().flush().await);
        assert_eq!(store.buffered_len(&UserId::new("a")), 1);
        assert_eq!(store.buffered_len(&UserId::new("b")), 1);
        assert_eq!(store.resource_timestamp(COMMENTS), Some(ts));
    }

    #[tokio::test]
    async fn test_every_socket_of_user_receives() {
        let store = Arc::new(MemoryStore::default());
        store.add_interest(COMMENTS, UserId::new("a"));
        let h = bridge_over(store);
        let mut rx1 = connect(&h.registry, "a");
        let mut rx2 = connect(&h.registry, "a");

        let report = h.bridge.handle_update(ResourceUpdate::new(COMMENTS, 5)).await;
        assert_eq!(report.delivered, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_keys_match_exactly() {
        let store = Arc::new(MemoryStore::default());
        store.add_interest("/api/workspaces/W/tasks/*/", UserId::new("a"));
        let h = bridge_over(store);
        let mut rx = connect(&h.registry, "a");

        let report = h
            .bridge
            .handle_update(ResourceUpdate::new("/api/workspaces/W/tasks/T/", 5))
            .await;
        assert_eq!(report.interested, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_payload_skipped() {
        let h = bridge_over(Arc::new(MemoryStore::default()));
        assert!(h.bridge.handle_payload("not json").await.is_none());
        assert!(h.bridge.handle_payload(r#"{"key":"/x"}"#).await.is_none());
        assert!(
            h.bridge
                .handle_payload(r#"{"key":"/x","timestamp":1}"#)
                .await
                .is_some()
        );
    }

    /// Buffer whose writes for one user take far longer than any timeout.
    #[derive(Debug, Default)]
    struct SlowBuffer {
        inner: MemoryStore,
    }

    #[async_trait]
    impl UpdateBuffer for SlowBuffer {
        async fn record(&self, user_id: &UserId, update: &ResourceUpdate) -> AppResult<()> {
            if user_id.as_str() == "slow" {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            self.inner.record(user_id, update).await
        }

        async fn updates_since(&self, user_id: &UserId, since: i64) -> AppResult<Vec<ResourceUpdate>> {
            self.inner.updates_since(user_id, since).await
        }
    }

    #[tokio::test]
    async fn test_slow_buffer_does_not_delay_live_delivery() {
        let store = Arc::new(MemoryStore::default());
        store.add_interest(COMMENTS, UserId::new("a"));
        store.add_interest(COMMENTS, UserId::new("slow"));
        let h = bridge_with(store, Arc::new(SlowBuffer::default()));
        let mut rx_a = connect(&h.registry, "a");

        let fanout = h.bridge.handle_update(ResourceUpdate::new(COMMENTS, now_ms()));
        let report = tokio::time::timeout(Duration::from_secs(2), fanout)
            .await
            .expect("fan-out waited on the buffer write");
        assert_eq!(report.delivered, 1);
        assert!(matches!(rx_a.try_recv(), Ok(OutboundFrame::Text(_))));

        // The second update is not held behind the first one's writes either.
        let fanout = h.bridge.handle_update(ResourceUpdate::new(COMMENTS, now_ms() + 1));
        tokio::time::timeout(Duration::from_secs(2), fanout).await.unwrap();
        assert!(rx_a.try_recv().is_ok());

        assert!(h.bridge.writer().flush().await);
        assert_eq!(h.metrics.snapshot().store_failures, 2);
    }

    #[derive(Debug)]
    struct BrokenIndex;

    #[async_trait]
    impl InterestIndex for BrokenIndex {
        async fn interested_users(&self, _: &str) -> AppResult<Vec<UserId>> {
            Err(AppError::cache("connection refused"))
        }

        async fn record_timestamp(&self, _: &ResourceUpdate) -> AppResult<()> {
            Err(AppError::cache("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_store_failure_drops_update() {
        let h = bridge_with(Arc::new(BrokenIndex), Arc::new(MemoryStore::default()));
        let mut rx = connect(&h.registry, "a");

        let report = h.bridge.handle_update(ResourceUpdate::new(COMMENTS, 1)).await;
        assert_eq!(report, FanoutReport { interested: 0, delivered: 0, persisted: true });
        assert!(rx.try_recv().is_err());

        assert!(h.bridge.writer().flush().await);
        assert_eq!(h.metrics.snapshot().store_failures, 2);
    }
}
