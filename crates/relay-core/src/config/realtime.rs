//! Real-time WebSocket relay configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection liveness and delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Period of the server-driven ping sweep, in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    /// A socket with no inbound frame for this long is closed, in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
    /// Outbound queue length per connection.
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer_size: usize,
    /// Delay before re-subscribing after the pub/sub feed drops, in seconds.
    #[serde(default = "default_resubscribe_delay")]
    pub resubscribe_delay_seconds: u64,
    /// Upper bound on a single store call made while fanning out, in milliseconds.
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,
    /// Pending buffer writes held behind the live fan-out.
    #[serde(default = "default_buffer_queue")]
    pub buffer_queue_size: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: default_heartbeat_interval(),
            idle_timeout_seconds: default_idle_timeout(),
            channel_buffer_size: default_channel_buffer(),
            resubscribe_delay_seconds: default_resubscribe_delay(),
            store_timeout_ms: default_store_timeout(),
            buffer_queue_size: default_buffer_queue(),
        }
    }
}

impl RealtimeConfig {
    /// Heartbeat sweep period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// Idle timeout backstop.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Pub/sub resubscribe delay.
    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_secs(self.resubscribe_delay_seconds)
    }

    /// Store call timeout.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    120
}

fn default_channel_buffer() -> usize {
    256
}

fn default_resubscribe_delay() -> u64 {
    5
}

fn default_store_timeout() -> u64 {
    2000
}

fn default_buffer_queue() -> usize {
    1024
}
