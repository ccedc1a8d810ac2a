//! Live connections indexed by user ID.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use relay_core::types::UserId;

use super::handle::{ConnectionHandle, ConnectionId};

/// Thread-safe registry of live WebSocket connections.
///
/// Sharded by user (one `DashMap` shard lock per bucket), so the socket
/// handler and the pub/sub fan-out path can add, remove and broadcast
/// concurrently. A user entry exists only while it has at least one socket.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// User ID → that user's connections (one per tab/device).
    by_user: DashMap<UserId, HashMap<ConnectionId, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection. Re-adding the same handle is a no-op.
    ///
    /// Returns `true` if the handle was not registered before.
    pub fn add(&self, handle: Arc<ConnectionHandle>) -> bool {
        self.by_user
            .entry(handle.user_id.clone())
            .or_default()
            .insert(handle.id, handle)
            .is_none()
    }

    /// Removes a connection, dropping the user entry once it is empty.
    pub fn remove(&self, user_id: &UserId, conn_id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        match self.by_user.entry(user_id.clone()) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(conn_id);
                if entry.get().is_empty() {
                    entry.remove();
                }
                removed
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Delivers `message` to every connection registered for `user_id`.
    ///
    /// Each handle is tried independently; a dead or full socket does not
    /// affect the others. Handles found closed are unregistered. Returns the
    /// number of connections the message was queued on.
    pub fn broadcast(&self, user_id: &UserId, message: &str) -> usize {
        // Snapshot first so no shard lock is held while sending.
        let handles = self.connections_for(user_id);
        let mut delivered = 0;
        let mut dead = Vec::new();

        for handle in &handles {
            if handle.send_text(message) {
                delivered += 1;
            } else if handle.is_closed() {
                dead.push(handle.id);
            }
        }

        for conn_id in dead {
            if self.remove(user_id, &conn_id).is_some() {
                debug!(user_id = %user_id, conn_id = %conn_id, "Dropped closed connection during broadcast");
            }
        }

        delivered
    }

    /// All connections for a user.
    pub fn connections_for(&self, user_id: &UserId) -> Vec<Arc<ConnectionHandle>> {
        self.by_user
            .get(user_id)
            .map(|entry| entry.value().values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a specific connection is registered.
    pub fn contains(&self, user_id: &UserId, conn_id: &ConnectionId) -> bool {
        self.by_user
            .get(user_id)
            .map(|entry| entry.contains_key(conn_id))
            .unwrap_or(false)
    }

    /// All registered connections.
    pub fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.by_user
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Removes and returns every connection.
    pub fn drain(&self) -> Vec<Arc<ConnectionHandle>> {
        let users: Vec<UserId> = self.by_user.iter().map(|e| e.key().clone()).collect();
        users
            .into_iter()
            .filter_map(|user| self.by_user.remove(&user))
            .flat_map(|(_, conns)| conns.into_values())
            .collect()
    }

    /// Total number of live connections.
    pub fn connection_count(&self) -> usize {
        self.by_user.iter().map(|entry| entry.value().len()).sum()
    }

    /// Number of users with at least one live connection.
    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::handle::OutboundFrame;
    use tokio::sync::mpsc;

    fn ready_handle(user: &str) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = Arc::new(ConnectionHandle::new(UserId::new(user), tx));
        handle.mark_ready();
        (handle, rx)
    }

    #[test]
    fn test_add_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = ready_handle("a");
        assert!(registry.add(handle.clone()));
        assert!(!registry.add(handle.clone()));
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.user_count(), 1);
    }

    #[test]
    fn test_remove_drops_empty_user_entry() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1) = ready_handle("a");
        let (h2, _rx2) = ready_handle("a");
        registry.add(h1.clone());
        registry.add(h2.clone());

        assert!(registry.remove(&h1.user_id, &h1.id).is_some());
        assert_eq!(registry.user_count(), 1);
        assert!(registry.remove(&h2.user_id, &h2.id).is_some());
        assert_eq!(registry.user_count(), 0);
        assert!(registry.remove(&h2.user_id, &h2.id).is_none());
    }

    #[test]
    fn test_broadcast_reaches_every_connection_of_user() {
        let registry = ConnectionRegistry::new();
        let (h1, mut rx1) = ready_handle("a");
        let (h2, mut rx2) = ready_handle("a");
        let (h3, mut rx3) = ready_handle("b");
        registry.add(h1);
        registry.add(h2);
        registry.add(h3);

        assert_eq!(registry.broadcast(&UserId::new("a"), "msg"), 2);
        assert_eq!(rx1.try_recv().unwrap(), OutboundFrame::Text("msg".into()));
        assert_eq!(rx2.try_recv().unwrap(), OutboundFrame::Text("msg".into()));
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_isolates_dead_handles() {
        let registry = ConnectionRegistry::new();
        let (dead, dead_rx) = ready_handle("a");
        let (live, mut live_rx) = ready_handle("a");
        registry.add(dead.clone());
        registry.add(live.clone());
        drop(dead_rx);

        assert_eq!(registry.broadcast(&UserId::new("a"), "msg"), 1);
        assert_eq!(live_rx.try_recv().unwrap(), OutboundFrame::Text("msg".into()));
        assert!(!registry.contains(&dead.user_id, &dead.id));
        assert!(registry.contains(&live.user_id, &live.id));
    }

    #[test]
    fn test_broadcast_to_unknown_user() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.broadcast(&UserId::new("nobody"), "msg"), 0);
        assert_eq!(registry.user_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_add_remove_broadcast() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();

        for i in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let user = format!("user-{}", i % 4);
                let (handle, _rx) = ready_handle(&user);
                registry.add(handle.clone());
                registry.broadcast(&handle.user_id, "tick");
                registry.remove(&handle.user_id, &handle.id);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.user_count(), 0);
    }

    #[test]
    fn test_drain() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1) = ready_handle("a");
        let (h2, _rx2) = ready_handle("b");
        registry.add(h1);
        registry.add(h2);
        assert_eq!(registry.drain().len(), 2);
        assert_eq!(registry.connection_count(), 0);
    }
}
