//! Core traits defined in `relay-core` and implemented by other crates.

pub mod auth;
pub mod store;

pub use auth::SessionAuthenticator;
pub use store::{InterestIndex, PushSubscriptionStore, UpdateBuffer};
