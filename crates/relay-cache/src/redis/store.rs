//! Redis implementation of the relay store traits.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use relay_core::config::StoreConfig;
use relay_core::error::{AppError, ErrorKind};
use relay_core::result::AppResult;
use relay_core::traits::{InterestIndex, PushSubscriptionStore, UpdateBuffer};
use relay_core::types::{ResourceUpdate, UserId};

use super::client::RedisClient;
use crate::keys;

/// Redis-backed interest index, update buffer and subscription store.
#[derive(Debug, Clone)]
pub struct RedisStore {
    /// Redis client.
    client: RedisClient,
    /// Per-user buffer cap.
    buffer_max_entries: usize,
    /// Per-user buffer retention window.
    buffer_retention: Duration,
}

impl RedisStore {
    /// Create a new Redis store.
    pub fn new(client: RedisClient, config: &StoreConfig) -> Self {
        Self {
            client,
            buffer_max_entries: config.buffer_max_entries.max(1),
            buffer_retention: Duration::from_secs(config.buffer_retention_seconds),
        }
    }

    /// The wrapped client.
    pub fn client(&self) -> &RedisClient {
        &self.client
    }

    /// Map a Redis error to an AppError.
    fn map_err(e: redis::RedisError) -> AppError {
        AppError::with_source(ErrorKind::Cache, format!("Redis error: {e}"), e)
    }

    fn retention_ms(&self) -> i64 {
        self.buffer_retention.as_millis() as i64
    }
}

#[async_trait]
impl InterestIndex for RedisStore {
    async fn interested_users(&self, key: &str) -> AppResult<Vec<UserId>> {
        let mut conn = self.client.conn_mut();
        let members: Vec<String> = conn
            .smembers(keys::resource_users(key))
            .await
            .map_err(Self::map_err)?;
        Ok(members.into_iter().map(UserId::from).collect())
    }

    async fn record_timestamp(&self, update: &ResourceUpdate) -> AppResult<()> {
        let mut conn = self.client.conn_mut();
        let _: () = conn
            .set(keys::resource_timestamp(&update.key), update.timestamp)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }
}

#[async_trait]
impl UpdateBuffer for RedisStore {
    async fn record(&self, user_id: &UserId, update: &ResourceUpdate) -> AppResult<()> {
        let buffer_key = keys::user_updates(user_id);
        let cutoff = chrono::Utc::now().timestamp_millis() - self.retention_ms();
        let mut conn = self.client.conn_mut();

        // ZADD replaces the score of an existing member, so each key keeps
        // only its newest timestamp. Trim by age, then keep the newest N.
        redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&buffer_key)
            .arg(update.timestamp)
            .arg(&update.key)
            .ignore()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&buffer_key)
            .arg("-inf")
            .arg(format!("({cutoff}"))
            .ignore()
            .cmd("ZREMRANGEBYRANK")
            .arg(&buffer_key)
            .arg(0)
            .arg(-(self.buffer_max_entries as i64) - 1)
            .ignore()
            .cmd("EXPIRE")
            .arg(&buffer_key)
            .arg(self.buffer_retention.as_secs().max(1))
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::map_err)?;

        debug!(user_id = %user_id, key = %update.key, "Buffered update");
        Ok(())
    }

    async fn updates_since(&self, user_id: &UserId, since: i64) -> AppResult<Vec<ResourceUpdate>> {
        // Exclusive lower bound: newer than `since` and inside the retention window.
        let cutoff = chrono::Utc::now().timestamp_millis() - self.retention_ms();
        let floor = since.max(cutoff - 1);
        let mut conn = self.client.conn_mut();
        let entries: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(keys::user_updates(user_id))
            .arg(format!("({floor}"))
            .arg("+inf")
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        Ok(entries
            .into_iter()
            .map(|(key, score)| ResourceUpdate::new(key, score as i64))
            .collect())
    }
}

#[async_trait]
impl PushSubscriptionStore for RedisStore {
    async fn store_subscription(
        &self,
        user_id: &UserId,
        subscription: &serde_json::Value,
    ) -> AppResult<()> {
        let raw = serde_json::to_string(subscription)?;
        let mut conn = self.client.conn_mut();
        let _: () = conn
            .set(keys::push_subscription(user_id), raw)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn subscription(&self, user_id: &UserId) -> AppResult<Option<serde_json::Value>> {
        let mut conn = self.client.conn_mut();
        let raw: Option<String> = conn
            .get(keys::push_subscription(user_id))
            .await
            .map_err(Self::map_err)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
