//! Session introspection against the external API.

pub mod introspect;

pub use introspect::SessionIntrospector;
