//! Inbound WebSocket message definitions.
//!
//! Server→client traffic is the bare `ResourceUpdate` JSON plus the literal
//! `"pong"`; only client→server messages need a schema here.

use serde::{Deserialize, Serialize};

use relay_core::error::AppError;

/// Application-level keepalive sent by clients.
pub const PING: &str = "ping";

/// Reply to [`PING`].
pub const PONG: &str = "pong";

/// Maximum allowed inbound message size in bytes.
const MAX_MESSAGE_SIZE: usize = 65_536;

/// JSON messages sent by the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Store the browser push subscription for this user.
    Subscribe {
        /// Opaque subscription descriptor.
        subscription: serde_json::Value,
    },
    /// Replay buffered updates newer than `timestamp`.
    Sync {
        /// Client watermark, epoch millis.
        #[serde(default)]
        timestamp: i64,
    },
}

/// A parsed inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Literal `"ping"`.
    Ping,
    /// Structured message.
    Message(ClientMessage),
}

/// Parse a text frame from a client.
pub fn parse_inbound(raw: &str) -> Result<InboundFrame, AppError> {
    if raw.len() > MAX_MESSAGE_SIZE {
        return Err(AppError::validation(format!(
            "Message exceeds maximum size of {MAX_MESSAGE_SIZE} bytes"
        )));
    }

    let trimmed = raw.trim();
    if trimmed == PING {
        return Ok(InboundFrame::Ping);
    }
    if trimmed.is_empty() {
        return Err(AppError::validation("Empty message"));
    }

    let message = serde_json::from_str::<ClientMessage>(trimmed)
        .map_err(|e| AppError::validation(format!("Unrecognized message: {e}")))?;
    Ok(InboundFrame::Message(message))
}
