//! Per-connection gateway session state.

use parley_common::id::{prefix, prefixed_ulid};

use crate::engine::{SyncRequest, SyncResult};
use crate::models::presence::PresenceEntry;

/// State for a single WebSocket connection.
pub struct GatewaySession {
    /// Unique connection identifier (`gw_` prefixed ULID).
    pub connection_id: String,
    /// Chat session this connection carries.
    pub session_token: String,
    pub room_id: i64,
    pub user_id: i64,
    cursor: i64,
    row_parity: u8,
    /// Sequence number of the last dispatch event.
    seq: u64,
}

impl GatewaySession {
    pub fn new(entry: &PresenceEntry, cursor: i64, row_parity: u8) -> Self {
        Self {
            connection_id: prefixed_ulid(prefix::GATEWAY),
            session_token: entry.token.clone(),
            room_id: entry.room_id,
            user_id: entry.user_id,
            cursor,
            row_parity,
            seq: 0,
        }
    }

    /// A plain poll from where the connection left off.
    pub fn poll(&self) -> SyncRequest {
        SyncRequest::poll(&self.session_token, self.cursor, self.row_parity)
    }

    /// Remember the cursor handed out by `result`.
    pub fn advance(&mut self, result: &SyncResult) {
        self.cursor = result.cursor;
        self.row_parity = result.row_parity;
    }

    /// Get the next sequence number for a dispatch event.
    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}
