//! # relay-api
//!
//! HTTP layer for TaskRelay built on Axum.
//!
//! Provides the authenticated WebSocket upgrade, the health endpoint, and
//! the mapping from `AppError` to HTTP responses.

pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use error::ApiError;
pub use router::build_router;
pub use state::AppState;
