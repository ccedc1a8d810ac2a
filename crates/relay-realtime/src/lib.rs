//! # relay-realtime
//!
//! Real-time relay engine for TaskRelay. Provides:
//!
//! - A connection registry mapping users to their live sockets
//! - Two-strike heartbeat eviction of dead connections
//! - Hydration: replay of buffered updates when a socket opens, and on
//!   explicit `sync` requests
//! - Fan-out of `ResourceUpdate` events from Redis (or in-process) pub/sub
//!   to every live socket of every interested user, with buffer writes
//!   queued behind live delivery

pub mod bridge;
pub mod connection;
pub mod hydration;
pub mod message;
pub mod metrics;
pub mod server;

pub use bridge::UpdateBridge;
pub use connection::{ConnectionHandle, ConnectionManager, ConnectionRegistry, LivenessMonitor};
pub use server::RelayEngine;
