//! Bridges between the pub/sub update feed and live connections.

pub mod buffer_writer;
pub mod memory_feed;
pub mod redis_feed;
pub mod update_bridge;

pub use buffer_writer::BufferWriter;
pub use memory_feed::MemoryUpdateFeed;
pub use redis_feed::RedisUpdateFeed;
pub use update_bridge::{FanoutReport, UpdateBridge};
