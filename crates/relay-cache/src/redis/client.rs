//! Redis connection management.

use redis::Client;
use redis::aio::ConnectionManager;
use tracing::info;

use relay_core::config::StoreConfig;
use relay_core::error::{AppError, ErrorKind};
use relay_core::result::AppResult;

/// Redis client wrapper holding both a command connection and the client
/// handle used to open dedicated pub/sub connections.
#[derive(Clone)]
pub struct RedisClient {
    /// Client used to open pub/sub connections.
    client: Client,
    /// Redis connection manager (multiplexed, reconnecting).
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient").finish()
    }
}

impl RedisClient {
    /// Connect using the store configuration.
    pub async fn connect(config: &StoreConfig) -> AppResult<Self> {
        let url = config.redis_url();
        info!(url = %mask_redis_url(&url), "Connecting to Redis");

        let client = Client::open(url.as_str()).map_err(|e| {
            AppError::with_source(ErrorKind::Cache, "Failed to create Redis client", e)
        })?;

        let conn = ConnectionManager::new(client.clone()).await.map_err(|e| {
            AppError::with_source(ErrorKind::Cache, "Failed to connect to Redis", e)
        })?;

        info!("Successfully connected to Redis");
        Ok(Self { client, conn })
    }

    /// Get a mutable clone of the connection manager.
    pub fn conn_mut(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// The underlying client, for opening pub/sub connections.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Mask password in Redis URL for safe logging.
pub fn mask_redis_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
            if colon_pos >= scheme_end {
                return format!("{}:****@{}", &url[..colon_pos], &url[at_pos + 1..]);
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_redis_url("redis://:hunter2@cache:6379/0"),
            "redis://:****@cache:6379/0"
        );
    }

    #[test]
    fn test_mask_leaves_plain_url() {
        assert_eq!(mask_redis_url("redis://cache:6379/0"), "redis://cache:6379/0");
    }
}
