//! Backing store (Redis) configuration.

use serde::{Deserialize, Serialize};

/// Pub/sub-capable backing store configuration.
///
/// The store holds every piece of durable relay state: the resource-interest
/// index, the per-user update buffers and push subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store provider: `"redis"` or `"memory"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Redis host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Redis port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Redis logical database.
    #[serde(default)]
    pub db: u32,
    /// Optional Redis password.
    #[serde(default)]
    pub password: Option<String>,
    /// Pub/sub channel carrying `ResourceUpdate` events.
    #[serde(default = "default_update_channel")]
    pub update_channel: String,
    /// Maximum number of entries retained per user in the update buffer.
    #[serde(default = "default_buffer_max_entries")]
    pub buffer_max_entries: usize,
    /// Retention window of the per-user update buffer, in seconds.
    #[serde(default = "default_buffer_retention")]
    pub buffer_retention_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            host: default_host(),
            port: default_port(),
            db: 0,
            password: None,
            update_channel: default_update_channel(),
            buffer_max_entries: default_buffer_max_entries(),
            buffer_retention_seconds: default_buffer_retention(),
        }
    }
}

impl StoreConfig {
    /// Connection URL in the `redis://[:password@]host:port/db` form.
    pub fn redis_url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{password}@{}:{}/{}",
                self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

fn default_provider() -> String {
    "redis".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_update_channel() -> String {
    "resource-updates".to_string()
}

fn default_buffer_max_entries() -> usize {
    200
}

fn default_buffer_retention() -> u64 {
    86_400
}
