//! # relay-cache
//!
//! Store implementations for the durable relay state. Two backends:
//!
//! - **redis**: shared with the external write-side API, which publishes
//!   updates and maintains the interest sets
//! - **memory**: single-process store for development and tests
//!
//! The backend is selected at runtime from configuration.

pub mod keys;
#[cfg(feature = "memory")]
pub mod memory;
pub mod provider;
#[cfg(feature = "redis-backend")]
pub mod redis;

pub use provider::StoreManager;
