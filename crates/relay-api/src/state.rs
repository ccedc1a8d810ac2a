//! Application state shared across all handlers.

use std::sync::Arc;

use relay_core::config::AppConfig;
use relay_core::traits::SessionAuthenticator;
use relay_realtime::RelayEngine;

/// Application state passed to every Axum handler via `State<AppState>`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// WebSocket relay engine
    pub engine: Arc<RelayEngine>,
    /// Upgrade gate
    pub authenticator: Arc<dyn SessionAuthenticator>,
}

impl AppState {
    /// Bundle the shared dependencies.
    pub fn new(
        config: Arc<AppConfig>,
        engine: Arc<RelayEngine>,
        authenticator: Arc<dyn SessionAuthenticator>,
    ) -> Self {
        Self {
            config,
            engine,
            authenticator,
        }
    }
}
