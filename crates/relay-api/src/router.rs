//! Route definitions for the relay HTTP surface.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the Axum router.
///
/// The WebSocket endpoint is served at both `/` and `/ws`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::ws::ws_upgrade))
        .route("/ws", get(handlers::ws::ws_upgrade))
        .route("/health", get(handlers::health::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
