//! Key builders for every store entry the relay touches.
//!
//! The layout is shared with the external API, so these names are part of
//! the interop contract and carry no prefix.

use relay_core::types::UserId;

/// Set of user IDs interested in a resource key.
pub fn resource_users(key: &str) -> String {
    format!("resource-users:{key}")
}

/// Latest timestamp published for a resource key.
pub fn resource_timestamp(key: &str) -> String {
    format!("resource-timestamps:{key}")
}

/// Per-user update buffer (sorted set: member = key, score = timestamp).
pub fn user_updates(user_id: &UserId) -> String {
    format!("user-updates:{user_id}")
}

/// Push subscription descriptor for a user.
pub fn push_subscription(user_id: &UserId) -> String {
    format!("push-subscription:{user_id}")
}
