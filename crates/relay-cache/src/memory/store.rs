//! In-memory relay store backed by `DashMap`.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use relay_core::config::StoreConfig;
use relay_core::result::AppResult;
use relay_core::traits::{InterestIndex, PushSubscriptionStore, UpdateBuffer};
use relay_core::types::{ResourceUpdate, UserId};

/// Single-process store with the same semantics as the Redis layout.
#[derive(Debug)]
pub struct MemoryStore {
    /// Resource key → interested users.
    interests: DashMap<String, HashSet<UserId>>,
    /// Resource key → latest timestamp.
    timestamps: DashMap<String, i64>,
    /// User → (resource key → timestamp).
    buffers: DashMap<UserId, HashMap<String, i64>>,
    /// User → push subscription.
    subscriptions: DashMap<UserId, serde_json::Value>,
    /// Per-user buffer cap.
    buffer_max_entries: usize,
    /// Per-user buffer retention window.
    buffer_retention: Duration,
}

impl MemoryStore {
    /// Create a store using the buffer caps from configuration.
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            interests: DashMap::new(),
            timestamps: DashMap::new(),
            buffers: DashMap::new(),
            subscriptions: DashMap::new(),
            buffer_max_entries: config.buffer_max_entries.max(1),
            buffer_retention: Duration::from_secs(config.buffer_retention_seconds),
        }
    }

    /// Register interest of `user_id` in `key`.
    ///
    /// In production this is done by the external API; the memory store
    /// exposes it for development setups and tests.
    pub fn add_interest(&self, key: &str, user_id: UserId) {
        self.interests
            .entry(key.to_string())
            .or_default()
            .insert(user_id);
    }

    /// Number of buffered entries for a user.
    pub fn buffered_len(&self, user_id: &UserId) -> usize {
        self.buffers.get(user_id).map(|b| b.len()).unwrap_or(0)
    }

    /// Latest timestamp recorded for a resource key.
    pub fn resource_timestamp(&self, key: &str) -> Option<i64> {
        self.timestamps.get(key).map(|ts| *ts)
    }

    fn retention_cutoff(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() - self.buffer_retention.as_millis() as i64
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&StoreConfig::default())
    }
}

#[async_trait]
impl InterestIndex for MemoryStore {
    async fn interested_users(&self, key: &str) -> AppResult<Vec<UserId>> {
        Ok(self
            .interests
            .get(key)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn record_timestamp(&self, update: &ResourceUpdate) -> AppResult<()> {
        self.timestamps.insert(update.key.clone(), update.timestamp);
        Ok(())
    }
}

#[async_trait]
impl UpdateBuffer for MemoryStore {
    async fn record(&self, user_id: &UserId, update: &ResourceUpdate) -> AppResult<()> {
        let cutoff = self.retention_cutoff();

        let mut buffer = self.buffers.entry(user_id.clone()).or_default();
        buffer.insert(update.key.clone(), update.timestamp);
        buffer.retain(|_, ts| *ts >= cutoff);

        if buffer.len() > self.buffer_max_entries {
            let mut by_age: Vec<(String, i64)> =
                buffer.iter().map(|(k, ts)| (k.clone(), *ts)).collect();
            by_age.sort_by_key(|(_, ts)| *ts);
            let excess = buffer.len() - self.buffer_max_entries;
            for (key, _) in by_age.into_iter().take(excess) {
                buffer.remove(&key);
            }
        }
        Ok(())
    }

    async fn updates_since(&self, user_id: &UserId, since: i64) -> AppResult<Vec<ResourceUpdate>> {
        let cutoff = self.retention_cutoff();
        let updates = match self.buffers.get_mut(user_id) {
            Some(mut buffer) => {
                buffer.retain(|_, ts| *ts >= cutoff);
                buffer
                    .iter()
                    .filter(|(_, ts)| **ts > since)
                    .map(|(key, ts)| ResourceUpdate::new(key.clone(), *ts))
                    .collect()
            }
            None => Vec::new(),
        };
        self.buffers.remove_if(user_id, |_, buffer| buffer.is_empty());
        Ok(updates)
    }
}

#[async_trait]
impl PushSubscriptionStore for MemoryStore {
    async fn store_subscription(
        &self,
        user_id: &UserId,
        subscription: &serde_json::Value,
    ) -> AppResult<()> {
        self.subscriptions
            .insert(user_id.clone(), subscription.clone());
        Ok(())
    }

    async fn subscription(&self, user_id: &UserId) -> AppResult<Option<serde_json::Value>> {
        Ok(self.subscriptions.get(user_id).map(|s| s.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn make_store(max_entries: usize) -> MemoryStore {
        let config = StoreConfig {
            provider: "memory".to_string(),
            buffer_max_entries: max_entries,
            buffer_retention_seconds: 3600,
            ..StoreConfig::default()
        };
        MemoryStore::new(&config)
    }

    #[tokio::test]
    async fn test_interest_lookup_is_exact() {
        let store = make_store(10);
        store.add_interest("/api/workspaces/w/tasks/*/", UserId::new("a"));
        store.add_interest("/api/workspaces/w/tasks/*/", UserId::new("b"));

        let mut users = store
            .interested_users("/api/workspaces/w/tasks/*/")
            .await
            .unwrap();
        users.sort();
        assert_eq!(users, vec![UserId::new("a"), UserId::new("b")]);

        assert!(store
            .interested_users("/api/workspaces/w/")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_buffer_keeps_newest_per_key() {
        let store = make_store(10);
        let user = UserId::new("a");
        let base = now_ms();
        store
            .record(&user, &ResourceUpdate::new("/k/", base))
            .await
            .unwrap();
        store
            .record(&user, &ResourceUpdate::new("/k/", base + 5))
            .await
            .unwrap();

        let updates = store.updates_since(&user, 0).await.unwrap();
        assert_eq!(updates, vec![ResourceUpdate::new("/k/", base + 5)]);
    }

    #[tokio::test]
    async fn test_buffer_is_capped() {
        let store = make_store(3);
        let user = UserId::new("a");
        let base = now_ms();
        for i in 0..5 {
            store
                .record(&user, &ResourceUpdate::new(format!("/k/{i}/"), base + i))
                .await
                .unwrap();
        }

        assert_eq!(store.buffered_len(&user), 3);
        let mut keys: Vec<String> = store
            .updates_since(&user, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["/k/2/", "/k/3/", "/k/4/"]);
    }

    #[tokio::test]
    async fn test_buffer_drops_expired_entries() {
        let store = make_store(10);
        let user = UserId::new("a");
        store
            .record(&user, &ResourceUpdate::new("/old/", 1))
            .await
            .unwrap();
        store
            .record(&user, &ResourceUpdate::new("/new/", now_ms()))
            .await
            .unwrap();

        let updates = store.updates_since(&user, 0).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].key, "/new/");
    }

    #[tokio::test]
    async fn test_updates_since_is_exclusive() {
        let store = make_store(10);
        let user = UserId::new("a");
        let base = now_ms();
        store
            .record(&user, &ResourceUpdate::new("/a/", base))
            .await
            .unwrap();
        store
            .record(&user, &ResourceUpdate::new("/b/", base + 10))
            .await
            .unwrap();

        let updates = store.updates_since(&user, base).await.unwrap();
        assert_eq!(updates, vec![ResourceUpdate::new("/b/", base + 10)]);
    }

    #[tokio::test]
    async fn test_push_subscription_last_write_wins() {
        let store = make_store(10);
        let user = UserId::new("a");
        assert!(store.subscription(&user).await.unwrap().is_none());

        store
            .store_subscription(&user, &serde_json::json!({"endpoint": "one"}))
            .await
            .unwrap();
        store
            .store_subscription(&user, &serde_json::json!({"endpoint": "two"}))
            .await
            .unwrap();

        let sub = store.subscription(&user).await.unwrap().unwrap();
        assert_eq!(sub["endpoint"], "two");
    }

    #[tokio::test]
    async fn test_record_timestamp_overwrites() {
        let store = make_store(10);
        store
            .record_timestamp(&ResourceUpdate::new("/k/", 42))
            .await
            .unwrap();
        store
            .record_timestamp(&ResourceUpdate::new("/k/", 43))
            .await
            .unwrap();
        assert_eq!(store.resource_timestamp("/k/"), Some(43));
        assert_eq!(store.resource_timestamp("/other/"), None);
    }

    #[tokio::test]
    async fn test_expired_entries_not_replayed_without_new_writes() {
        let config = StoreConfig {
            provider: "memory".to_string(),
            buffer_retention_seconds: 1,
            ..StoreConfig::default()
        };
        let store = MemoryStore::new(&config);
        let user = UserId::new("a");
        store
            .record(&user, &ResourceUpdate::new("/k/", now_ms()))
            .await
            .unwrap();
        assert_eq!(store.updates_since(&user, 0).await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(store.updates_since(&user, 0).await.unwrap().is_empty());
        assert_eq!(store.buffered_len(&user), 0);
    }
}
