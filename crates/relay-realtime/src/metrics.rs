//! Relay engine metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Engine-level counters.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Sockets accepted after authentication
    pub connections_opened: AtomicU64,
    /// Sockets unregistered, for any reason
    pub connections_closed: AtomicU64,
    /// Sockets terminated by the heartbeat
    pub connections_evicted: AtomicU64,
    /// Updates received from pub/sub
    pub updates_received: AtomicU64,
    /// Malformed pub/sub payloads skipped
    pub updates_malformed: AtomicU64,
    /// Live frames queued on sockets
    pub messages_delivered: AtomicU64,
    /// Buffered frames replayed on sockets
    pub messages_replayed: AtomicU64,
    /// Store reads or writes that failed
    pub store_failures: AtomicU64,
}

impl RelayMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_evicted(&self) {
        self.connections_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_received(&self) {
        self.updates_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_malformed(&self) {
        self.updates_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self, count: usize) {
        self.messages_delivered
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn replayed(&self, count: usize) {
        self.messages_replayed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let opened = self.connections_opened.load(Ordering::Relaxed);
        let closed = self.connections_closed.load(Ordering::Relaxed);
        MetricsSnapshot {
            connections_opened: opened,
            connections_closed: closed,
            connections_active: opened.saturating_sub(closed),
            connections_evicted: self.connections_evicted.load(Ordering::Relaxed),
            updates_received: self.updates_received.load(Ordering::Relaxed),
            updates_malformed: self.updates_malformed.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_replayed: self.messages_replayed.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub connections_active: u64,
    pub connections_evicted: u64,
    pub updates_received: u64,
    pub updates_malformed: u64,
    pub messages_delivered: u64,
    pub messages_replayed: u64,
    pub store_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_is_opened_minus_closed() {
        let metrics = RelayMetrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        metrics.delivered(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.connections_active, 1);
        assert_eq!(snap.messages_delivered, 3);
    }
}
