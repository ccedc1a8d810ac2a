//! Store manager that dispatches to the configured backend.

use std::sync::Arc;

use tracing::info;

use relay_core::config::StoreConfig;
use relay_core::error::AppError;
use relay_core::result::AppResult;
use relay_core::traits::{InterestIndex, PushSubscriptionStore, UpdateBuffer};

/// The concrete backend behind a [`StoreManager`].
#[derive(Debug, Clone)]
pub enum StoreBackend {
    /// Shared Redis instance; also carries the pub/sub feed.
    #[cfg(feature = "redis-backend")]
    Redis(crate::redis::RedisClient),
    /// In-process store; updates are published in-process.
    #[cfg(feature = "memory")]
    Memory(Arc<crate::memory::MemoryStore>),
}

/// Bundle of store handles used by the relay engine.
///
/// The backend is selected at construction time based on configuration.
#[derive(Debug, Clone)]
pub struct StoreManager {
    /// Resource-interest index.
    pub interests: Arc<dyn InterestIndex>,
    /// Per-user update buffer.
    pub buffer: Arc<dyn UpdateBuffer>,
    /// Push subscription storage.
    pub subscriptions: Arc<dyn PushSubscriptionStore>,
    /// Backend, for wiring the pub/sub feed.
    backend: StoreBackend,
}

impl StoreManager {
    /// Create a store manager from configuration.
    pub async fn new(config: &StoreConfig) -> AppResult<Self> {
        match config.provider.as_str() {
            #[cfg(feature = "redis-backend")]
            "redis" => {
                info!("Initializing Redis store");
                let client = crate::redis::RedisClient::connect(config).await?;
                let store = Arc::new(crate::redis::RedisStore::new(client.clone(), config));
                Ok(Self {
                    interests: store.clone(),
                    buffer: store.clone(),
                    subscriptions: store,
                    backend: StoreBackend::Redis(client),
                })
            }
            #[cfg(feature = "memory")]
            "memory" => {
                info!("Initializing in-memory store");
                Ok(Self::from_memory(Arc::new(crate::memory::MemoryStore::new(
                    config,
                ))))
            }
            other => Err(AppError::configuration(format!(
                "Unknown store provider: '{other}'. Supported: memory, redis"
            ))),
        }
    }

    /// Create a store manager around an existing memory store (for testing).
    #[cfg(feature = "memory")]
    pub fn from_memory(store: Arc<crate::memory::MemoryStore>) -> Self {
        Self {
            interests: store.clone(),
            buffer: store.clone(),
            subscriptions: store.clone(),
            backend: StoreBackend::Memory(store),
        }
    }

    /// The backend in use.
    pub fn backend(&self) -> &StoreBackend {
        &self.backend
    }
}
