//! In-memory relay store.

pub mod store;

pub use store::MemoryStore;
