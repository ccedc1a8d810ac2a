//! Health check handler.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use relay_realtime::metrics::MetricsSnapshot;

use crate::state::AppState;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Live sockets.
    pub connections: usize,
    /// Users with at least one live socket.
    pub users: usize,
    pub metrics: MetricsSnapshot,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.engine.registry.connection_count(),
        users: state.engine.registry.user_count(),
        metrics: state.engine.metrics_snapshot(),
    })
}
