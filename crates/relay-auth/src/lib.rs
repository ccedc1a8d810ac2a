//! # relay-auth
//!
//! Authentication gate for WebSocket upgrades. A session cookie forwarded
//! from the upgrade request is validated against the external API's
//! session introspection endpoint.

pub mod session;

pub use session::SessionIntrospector;
