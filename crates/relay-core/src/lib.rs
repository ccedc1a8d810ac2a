//! # relay-core
//!
//! Core crate for TaskRelay. Contains the configuration schemas, the
//! `ResourceUpdate` event type, typed identifiers, the traits implemented
//! by the store and auth crates, and the unified error system.
//!
//! This crate has **no** internal dependencies on other TaskRelay crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
pub use types::{ResourceUpdate, UserId};
