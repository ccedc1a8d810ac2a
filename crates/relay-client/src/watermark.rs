//! Persisted client watermark.
//!
//! The watermark only moves forward: replayed updates can arrive out of
//! timestamp order, and an older one must not rewind the `sync` point.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use relay_core::error::{AppError, ErrorKind};
use relay_core::result::AppResult;

/// Storage for the last processed update timestamp.
#[async_trait]
pub trait WatermarkStore: Send + Sync + std::fmt::Debug {
    /// Current watermark (0 when nothing was ever processed).
    async fn load(&self) -> AppResult<i64>;

    /// Raise the watermark to `timestamp` if it is newer.
    ///
    /// Returns whether the stored value changed.
    async fn advance(&self, timestamp: i64) -> AppResult<bool>;
}

/// Process-local watermark.
#[derive(Debug, Default)]
pub struct MemoryWatermark {
    value: AtomicI64,
}

impl MemoryWatermark {
    /// Start at `initial`.
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermark {
    async fn load(&self) -> AppResult<i64> {
        Ok(self.value.load(Ordering::Acquire))
    }

    async fn advance(&self, timestamp: i64) -> AppResult<bool> {
        Ok(self.value.fetch_max(timestamp, Ordering::AcqRel) < timestamp)
    }
}

/// Watermark kept in a small text file so it survives restarts.
#[derive(Debug)]
pub struct FileWatermark {
    path: PathBuf,
    /// Cached value; the lock also serialises file writes.
    value: Mutex<i64>,
}

impl FileWatermark {
    /// Open the file, reading the stored value if present.
    ///
    /// A missing or unreadable file starts at 0.
    pub async fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let value = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw.trim().parse::<i64>().unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Corrupt watermark file, starting at 0");
                0
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(AppError::with_source(
                    ErrorKind::Internal,
                    format!("Failed to read watermark {}", path.display()),
                    e,
                ));
            }
        };

        Ok(Self {
            path,
            value: Mutex::new(value),
        })
    }

    async fn persist(&self, value: i64) -> AppResult<()> {
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, value.to_string())
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Internal, "Failed to write watermark", e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Internal, "Failed to replace watermark", e))
    }
}

#[async_trait]
impl WatermarkStore for FileWatermark {
    async fn load(&self) -> AppResult<i64> {
        Ok(*self.value.lock().await)
    }

    async fn advance(&self, timestamp: i64) -> AppResult<bool> {
        let mut current = self.value.lock().await;
        if timestamp <= *current {
            return Ok(false);
        }
        self.persist(timestamp).await?;
        *current = timestamp;
        Ok(true)
    }
}
