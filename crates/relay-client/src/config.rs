//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use relay_core::error::AppError;

/// Settings for one relay client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL of the relay, e.g. `ws://localhost:8080/ws`.
    #[serde(default = "default_url")]
    pub url: String,
    /// Session cookie sent on the upgrade request (`sessionid=...`).
    #[serde(default)]
    pub cookie: Option<String>,
    /// Unit of the linear reconnect backoff, in milliseconds.
    #[serde(default = "default_base_reconnect_delay")]
    pub base_reconnect_delay_ms: u64,
    /// Attempt count at which the backoff stops growing.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Period of the application-level `"ping"` keepalive.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_seconds: u64,
    /// Window in which a repeated `(key, timestamp)` is skipped.
    #[serde(default = "default_dedup_window")]
    pub dedup_window_ms: u64,
    /// Upper bound on a single connection attempt.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            cookie: None,
            base_reconnect_delay_ms: default_base_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            keepalive_interval_seconds: default_keepalive_interval(),
            dedup_window_ms: default_dedup_window(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl ClientConfig {
    /// Load from an optional TOML file and `RELAY_CLIENT__*` variables.
    pub fn load(path: Option<&str>) -> Result<Self, AppError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder
            .add_source(
                config::Environment::with_prefix("RELAY_CLIENT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build client config: {e}")))?
            .try_deserialize()
            .map_err(|e| {
                AppError::configuration(format!("Failed to deserialize client config: {e}"))
            })
    }

    /// Backoff unit as a [`Duration`].
    pub fn base_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.base_reconnect_delay_ms)
    }

    /// Keepalive period as a [`Duration`].
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_seconds.max(1))
    }

    /// Dedup window as a [`Duration`].
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds.max(1))
    }
}

fn default_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_base_reconnect_delay() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_dedup_window() -> u64 {
    5000
}

fn default_connect_timeout() -> u64 {
    10
}
