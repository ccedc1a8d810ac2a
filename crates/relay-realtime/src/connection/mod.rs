//! WebSocket connection management: handles, registry, heartbeat, lifecycle.

pub mod handle;
pub mod heartbeat;
pub mod manager;
pub mod registry;

pub use handle::{ConnectionHandle, ConnectionId, OutboundFrame};
pub use heartbeat::LivenessMonitor;
pub use manager::ConnectionManager;
pub use registry::ConnectionRegistry;
