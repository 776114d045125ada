//! Gateway opcodes, event types, and wire-format messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_SEND: u8 = 4;
pub const OP_HEARTBEAT_ACK: u8 = 6;
pub const OP_RECONNECT: u8 = 7;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    pub d: Value,
}

impl GatewayMessage {
    /// Build a DISPATCH message (op=0).
    pub fn dispatch(event_name: &str, seq: u64, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            s: Some(seq),
            d: data,
        }
    }

    /// Build a RECONNECT message (op=7). The client must log in to the room
    /// again before it can IDENTIFY.
    pub fn reconnect(reason: &str) -> Self {
        Self {
            op: OP_RECONNECT,
            t: None,
            s: None,
            d: serde_json::json!({ "reason": reason }),
        }
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

// ---------------------------------------------------------------------------
// IDENTIFY payload
// ---------------------------------------------------------------------------

/// Attach a connection to a presence session obtained from the login route.
#[derive(Debug, Deserialize)]
pub struct IdentifyPayload {
    pub session_token: String,
    /// Cursor from an earlier poll, 0 to start from the eviction window.
    #[serde(default)]
    pub cursor: i64,
    #[serde(default)]
    pub row_parity: u8,
}

// ---------------------------------------------------------------------------
// SEND payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SendPayload {
    #[serde(default)]
    pub message: Option<String>,
    /// A user id or `all`.
    #[serde(default)]
    pub beep: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

// ---------------------------------------------------------------------------
// HEARTBEAT payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Dispatch event types
// ---------------------------------------------------------------------------

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const READY: &'static str = "READY";
    /// A sync result, same shape as the HTTP sync response.
    pub const SYNC: &'static str = "SYNC";
    /// A request failed but the connection stays usable.
    pub const ERROR: &'static str = "ERROR";
}
