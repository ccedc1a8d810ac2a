//! Store traits for the durable relay state.
//!
//! All of this state lives in the external pub/sub-capable store; the relay
//! owns none of it on disk.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::{ResourceUpdate, UserId};

/// Maps a resource key to the users interested in it.
///
/// Populated by the external API whenever access or membership changes;
/// the relay only reads the interest sets.
#[async_trait]
pub trait InterestIndex: Send + Sync + std::fmt::Debug + 'static {
    /// Users interested in exactly `key`.
    async fn interested_users(&self, key: &str) -> AppResult<Vec<UserId>>;

    /// Remember the latest timestamp seen for a resource key.
    async fn record_timestamp(&self, update: &ResourceUpdate) -> AppResult<()>;
}

/// Capped per-user list of recent updates, replayed on reconnect.
///
/// Implementations keep at most one entry per resource key (the newest
/// timestamp wins) and evict by count and by age.
#[async_trait]
pub trait UpdateBuffer: Send + Sync + std::fmt::Debug + 'static {
    /// Append an update to a user's buffer, trimming it to its caps.
    async fn record(&self, user_id: &UserId, update: &ResourceUpdate) -> AppResult<()>;

    /// Buffered updates with a timestamp strictly greater than `since`.
    ///
    /// Order is unspecified.
    async fn updates_since(&self, user_id: &UserId, since: i64) -> AppResult<Vec<ResourceUpdate>>;
}

/// Storage for opaque browser push subscription descriptors.
#[async_trait]
pub trait PushSubscriptionStore: Send + Sync + std::fmt::Debug + 'static {
    /// Store (or replace) the user's push subscription.
    async fn store_subscription(
        &self,
        user_id: &UserId,
        subscription: &serde_json::Value,
    ) -> AppResult<()>;

    /// The user's current push subscription, if any.
    async fn subscription(&self, user_id: &UserId) -> AppResult<Option<serde_json::Value>>;
}
