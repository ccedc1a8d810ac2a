//! Ping/pong heartbeat for WebSocket liveness.
//!
//! Two-strike sweep: each tick, a connection whose flag is still clear
//! (no pong since the previous tick) is terminated and unregistered;
//! every other connection has its flag cleared and receives a ping.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info};

use super::handle::OutboundFrame;
use super::registry::ConnectionRegistry;
use crate::metrics::RelayMetrics;

/// Outcome of a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections that were pinged.
    pub pinged: usize,
    /// Connections that were terminated and removed.
    pub evicted: usize,
}

/// Periodic sweeper that evicts connections which stopped answering pings.
#[derive(Debug)]
pub struct LivenessMonitor {
    /// Registry being swept.
    registry: Arc<ConnectionRegistry>,
    /// Metrics.
    metrics: Arc<RelayMetrics>,
    /// Sweep period.
    interval: Duration,
}

impl LivenessMonitor {
    /// Create a monitor over `registry` ticking every `interval`.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<RelayMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            metrics,
            interval,
        }
    }

    /// Run one sweep over every registered connection.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for handle in self.registry.all_connections() {
            let answered = handle.take_alive();
            if answered && handle.deliver(OutboundFrame::Ping) {
                report.pinged += 1;
                continue;
            }

            handle.close();
            if self.registry.remove(&handle.user_id, &handle.id).is_some() {
                report.evicted += 1;
                self.metrics.connection_evicted();
                info!(
                    conn_id = %handle.id,
                    user_id = %handle.user_id,
                    answered_last_ping = answered,
                    "Evicted dead connection"
                );
            }
        }

        report
    }

    /// Sweep every interval until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.interval);
        // The first tick completes immediately; skip it so fresh
        // connections get a full interval before their first ping.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep();
                    debug!(pinged = report.pinged, evicted = report.evicted, "Heartbeat sweep");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Heartbeat loop ended");
    }
}
