//! Core type definitions used across the TaskRelay workspace.

pub mod id;
pub mod update;

pub use id::UserId;
pub use update::ResourceUpdate;
