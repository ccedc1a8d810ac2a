//! Top-level relay engine that ties together all subsystems.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use relay_cache::StoreManager;
use relay_cache::provider::StoreBackend;
use relay_core::config::{RealtimeConfig, StoreConfig};
use relay_core::types::ResourceUpdate;

use crate::bridge::{BufferWriter, MemoryUpdateFeed, RedisUpdateFeed, UpdateBridge};
use crate::connection::heartbeat::LivenessMonitor;
use crate::connection::manager::ConnectionManager;
use crate::connection::registry::ConnectionRegistry;
use crate::hydration::Hydrator;
use crate::metrics::{MetricsSnapshot, RelayMetrics};

/// Central relay engine that coordinates the WebSocket subsystems.
#[derive(Clone)]
pub struct RelayEngine {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Connection lifecycle.
    pub connections: Arc<ConnectionManager>,
    /// Pub/sub → sockets fan-out.
    pub bridge: Arc<UpdateBridge>,
    /// Heartbeat sweeper.
    pub monitor: Arc<LivenessMonitor>,
    /// Metrics collector.
    pub metrics: Arc<RelayMetrics>,
    /// Store backend, for wiring the update feed.
    backend: StoreBackend,
    /// In-process feed, present for the memory backend.
    memory_feed: Option<MemoryUpdateFeed>,
    /// Configuration.
    config: RealtimeConfig,
    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for RelayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayEngine")
            .field("connections", &self.registry.connection_count())
            .finish()
    }
}

impl RelayEngine {
    /// Creates a new relay engine over the given stores.
    pub fn new(config: RealtimeConfig, stores: &StoreManager) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        let metrics = Arc::new(RelayMetrics::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let hydrator = Hydrator::new(stores.buffer.clone(), metrics.clone());
        let connections = Arc::new(ConnectionManager::new(
            config.clone(),
            registry.clone(),
            hydrator,
            stores.subscriptions.clone(),
            metrics.clone(),
        ));
        let writer = Arc::new(BufferWriter::new(
            stores.interests.clone(),
            stores.buffer.clone(),
            metrics.clone(),
            config.buffer_queue_size,
            config.store_timeout(),
        ));
        let bridge = Arc::new(UpdateBridge::new(
            stores.interests.clone(),
            writer,
            registry.clone(),
            metrics.clone(),
            config.store_timeout(),
        ));
        let monitor = Arc::new(LivenessMonitor::new(
            registry.clone(),
            metrics.clone(),
            config.heartbeat_interval(),
        ));

        let backend = stores.backend().clone();
        let memory_feed = matches!(backend, StoreBackend::Memory(_))
            .then(|| MemoryUpdateFeed::new(config.channel_buffer_size));

        info!("Relay engine initialized");

        Self {
            registry,
            connections,
            bridge,
            monitor,
            metrics,
            backend,
            memory_feed,
            config,
            shutdown_tx,
        }
    }

    /// Spawn the heartbeat, the buffer writer and the update feed.
    pub fn start(&self, store: &StoreConfig) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(3);

        tasks.push(tokio::spawn(
            self.monitor.clone().run(self.shutdown_tx.subscribe()),
        ));
        tasks.extend(self.bridge.writer().spawn(self.shutdown_tx.subscribe()));

        match &self.backend {
            StoreBackend::Redis(client) => {
                let feed = RedisUpdateFeed::new(
                    client.client().clone(),
                    store.update_channel.clone(),
                    self.bridge.clone(),
                    self.config.resubscribe_delay(),
                );
                tasks.push(tokio::spawn(feed.run(self.shutdown_tx.subscribe())));
            }
            StoreBackend::Memory(_) => {
                if let Some(feed) = &self.memory_feed {
                    tasks.push(feed.spawn(self.bridge.clone(), self.shutdown_tx.subscribe()));
                }
            }
        }

        info!(
            heartbeat_seconds = self.config.heartbeat_interval_seconds,
            channel = %store.update_channel,
            "Relay engine started"
        );
        tasks
    }

    /// Publish through the in-process feed (memory backend only).
    ///
    /// Returns `false` when there is no in-process feed.
    pub fn publish_local(&self, update: &ResourceUpdate) -> bool {
        match &self.memory_feed {
            Some(feed) => {
                feed.publish(update);
                true
            }
            None => false,
        }
    }

    /// Liveness and delivery settings.
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Current metrics.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop background tasks and close every connection.
    pub fn shutdown(&self) {
        info!("Shutting down relay engine");
        self.shutdown_tx.send_replace(true);
        self.connections.close_all();
        info!("Relay engine shut down");
    }
}
