//! WebSocket message types and parsing.

pub mod types;

pub use types::{ClientMessage, InboundFrame, PING, PONG, parse_inbound};
