//! Session authentication trait (the WebSocket upgrade gate).

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::UserId;

/// Resolves a session credential to a user.
///
/// Every connection attempt authenticates independently: implementations
/// must not cache results and must not retry.
#[async_trait]
pub trait SessionAuthenticator: Send + Sync + std::fmt::Debug + 'static {
    /// Return the user owning the session carried in `cookie`, or an
    /// `Authentication` error when the credential is missing or rejected.
    async fn authenticate(&self, cookie: Option<&str>) -> AppResult<UserId>;
}
