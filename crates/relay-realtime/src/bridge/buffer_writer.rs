//! Background persistence of fanned-out updates.
//!
//! Live delivery never waits on the store: the bridge queues each update
//! here after broadcasting it, and a single task writes the queue in
//! order. Every store call is capped by a timeout.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use relay_core::error::AppError;
use relay_core::result::AppResult;
use relay_core::traits::{InterestIndex, UpdateBuffer};
use relay_core::types::{ResourceUpdate, UserId};

use crate::metrics::RelayMetrics;

#[derive(Debug)]
enum WriteJob {
    /// Record the key's timestamp and buffer the update for `users`.
    Record {
        users: Vec<UserId>,
        update: ResourceUpdate,
    },
    /// Signalled once every earlier job has been written.
    Flush(oneshot::Sender<()>),
}

/// Ordered, bounded queue of buffer and timestamp writes.
#[derive(Debug)]
pub struct BufferWriter {
    /// Job sender.
    tx: mpsc::Sender<WriteJob>,
    /// Job receiver, taken by the first `spawn`.
    rx: Mutex<Option<mpsc::Receiver<WriteJob>>>,
    /// Resource-interest index (timestamps).
    interests: Arc<dyn InterestIndex>,
    /// Per-user update buffer.
    buffer: Arc<dyn UpdateBuffer>,
    /// Metrics.
    metrics: Arc<RelayMetrics>,
    /// Cap on each store call.
    store_timeout: Duration,
}

impl BufferWriter {
    /// Create a writer holding up to `capacity` pending jobs.
    pub fn new(
        interests: Arc<dyn InterestIndex>,
        buffer: Arc<dyn UpdateBuffer>,
        metrics: Arc<RelayMetrics>,
        capacity: usize,
        store_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            interests,
            buffer,
            metrics,
            store_timeout,
        }
    }

    /// Queue an update for persistence without waiting.
    ///
    /// Returns `false` when the queue is full or the writer has stopped;
    /// the write is then dropped and counted as a store failure.
    pub fn enqueue(&self, users: Vec<UserId>, update: ResourceUpdate) -> bool {
        match self.tx.try_send(WriteJob::Record { users, update }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.metrics.store_failure();
                if let WriteJob::Record { update, .. } = job {
                    warn!(key = %update.key, "Buffer write queue full, dropping write");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.store_failure();
                warn!("Buffer writer stopped, dropping write");
                false
            }
        }
    }

    /// Start the writer task. Returns `None` if it was already started.
    ///
    /// On shutdown the jobs already queued are written before the task ends.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        let rx = self.rx.lock().unwrap_or_else(|e| e.into_inner()).take()?;
        Some(tokio::spawn(self.clone().run(rx, shutdown)))
    }

    /// Wait until every job queued before this call has been written.
    ///
    /// Requires a spawned writer. Returns `false` once the writer has stopped.
    pub async fn flush(&self) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteJob::Flush(done_tx)).await.is_err() {
            return false;
        }
        done_rx.await.is_ok()
    }

    async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<WriteJob>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                job = rx.recv() => match job {
                    Some(job) => self.execute(job).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        rx.close();
        while let Some(job) = rx.recv().await {
            self.execute(job).await;
        }
        debug!("Buffer writer stopped");
    }

    async fn execute(&self, job: WriteJob) {
        let (users, update) = match job {
            WriteJob::Flush(done) => {
                let _ = done.send(());
                return;
            }
            WriteJob::Record { users, update } => (users, update),
        };

        if let Err(e) = self.bounded(self.interests.record_timestamp(&update)).await {
            self.metrics.store_failure();
            warn!(key = %update.key, error = %e, "Failed to record resource timestamp");
        }

        let writes = users
            .iter()
            .map(|user| self.bounded(self.buffer.record(user, &update)));
        for (user, result) in users.iter().zip(join_all(writes).await) {
            if let Err(e) = result {
                self.metrics.store_failure();
                warn!(user_id = %user, key = %update.key, error = %e, "Failed to buffer update");
            }
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = AppResult<T>>) -> AppResult<T> {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_| AppError::cache("Store call timed out"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_cache::memory::MemoryStore;

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Buffer whose writes for `stuck` never finish.
    #[derive(Debug)]
    struct StuckBuffer {
        inner: MemoryStore,
        stuck: UserId,
    }

    #[async_trait]
    impl UpdateBuffer for StuckBuffer {
        async fn record(&self, user_id: &UserId, update: &ResourceUpdate) -> AppResult<()> {
            if *user_id == self.stuck {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            self.inner.record(user_id, update).await
        }

        async fn updates_since(&self, user_id: &UserId, since: i64) -> AppResult<Vec<ResourceUpdate>> {
            self.inner.updates_since(user_id, since).await
        }
    }

    fn writer(
        buffer: Arc<dyn UpdateBuffer>,
        capacity: usize,
    ) -> (Arc<BufferWriter>, Arc<RelayMetrics>) {
        let metrics = Arc::new(RelayMetrics::new());
        let writer = Arc::new(BufferWriter::new(
            Arc::new(MemoryStore::default()),
            buffer,
            metrics.clone(),
            capacity,
            Duration::from_millis(100),
        ));
        (writer, metrics)
    }

    #[tokio::test]
    async fn test_writes_in_order_and_flushes() {
        let store = Arc::new(MemoryStore::default());
        let (writer, _) = writer(store.clone(), 16);
        let (_tx, rx) = watch::channel(false);
        writer.spawn(rx).unwrap();
        assert!(writer.spawn(watch::channel(false).1).is_none());

        let user = UserId::new("a");
        let ts = now_ms();
        assert!(writer.enqueue(vec![user.clone()], ResourceUpdate::new("/k/", ts)));
        assert!(writer.enqueue(vec![user.clone()], ResourceUpdate::new("/k/", ts + 1)));
        assert!(writer.flush().await);

        let updates = store.updates_since(&user, 0).await.unwrap();
        assert_eq!(updates, vec![ResourceUpdate::new("/k/", ts + 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_write_times_out() {
        let store = StuckBuffer {
            inner: MemoryStore::default(),
            stuck: UserId::new("slow"),
        };
        let store = Arc::new(store);
        let (writer, metrics) = writer(store.clone(), 16);
        let (_tx, rx) = watch::channel(false);
        writer.spawn(rx).unwrap();

        let update = ResourceUpdate::new("/k/", now_ms());
        writer.enqueue(vec![UserId::new("a"), UserId::new("slow")], update.clone());
        assert!(writer.flush().await);

        assert_eq!(metrics.snapshot().store_failures, 1);
        assert_eq!(store.updates_since(&UserId::new("a"), 0).await.unwrap(), vec![update]);
        assert!(store.updates_since(&UserId::new("slow"), 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let (writer, metrics) = writer(Arc::new(MemoryStore::default()), 1);

        assert!(writer.enqueue(vec![UserId::new("a")], ResourceUpdate::new("/k/", 1)));
        assert!(!writer.enqueue(vec![UserId::new("a")], ResourceUpdate::new("/k/", 2)));
        assert_eq!(metrics.snapshot().store_failures, 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let store = Arc::new(MemoryStore::default());
        let (writer, _) = writer(store.clone(), 16);
        let user = UserId::new("a");
        let update = ResourceUpdate::new("/k/", now_ms());
        writer.enqueue(vec![user.clone()], update.clone());

        let (tx, rx) = watch::channel(false);
        tx.send_replace(true);
        writer.spawn(rx).unwrap().await.unwrap();

        assert_eq!(store.updates_since(&user, 0).await.unwrap(), vec![update]);
    }
}
