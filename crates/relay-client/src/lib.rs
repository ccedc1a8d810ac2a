//! # relay-client
//!
//! Client side of the TaskRelay protocol:
//!
//! - A reconnect state machine with linear, capped, never-ending backoff
//! - An ordered key router mapping resource keys to store refreshes
//! - A monotone, persisted watermark used for `sync` catch-up
//! - Push subscription registration over the live socket
//! - A tokio-tungstenite driver tying these together

pub mod backoff;
pub mod client;
pub mod config;
pub mod dedup;
pub mod processor;
pub mod push;
pub mod router;
pub mod state;
pub mod watermark;

pub use client::{ClientCommand, ClientHandle, RelayClient};
pub use config::ClientConfig;
pub use processor::{ProcessOutcome, UpdateProcessor};
pub use state::{ConnectionState, UiStatus};
pub use router::{MessageRouter, RefreshTarget, StoreRefresher};
pub use watermark::{FileWatermark, MemoryWatermark, WatermarkStore};
