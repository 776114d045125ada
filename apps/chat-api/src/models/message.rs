use std::fmt;
use std::str::FromStr;

use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::chat_messages;

/// Body prefix marking a beep.
pub const BEEP_PREFIX: &str = "beep ";
/// Body prefix marking an action line.
pub const ME_PREFIX: &str = "/me ";

/// An appended chat event. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, Serialize, ToSchema)]
#[diesel(table_name = chat_messages)]
pub struct Message {
    pub room_id: i64,
    /// Strictly increasing within a room. Breaks timestamp ties.
    pub seq: i64,
    /// Author. 0 for events with no user.
    pub user_id: i64,
    pub group_id: i64,
    pub body: String,
    pub is_system: bool,
    #[diesel(column_name = sent_at)]
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl Message {
    /// The system event this message records, if any.
    pub fn system_event(&self) -> Option<SystemEvent> {
        if self.is_system {
            self.body.parse().ok()
        } else {
            None
        }
    }
}

/// A message that has not been stamped or sequenced yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: i64,
    pub user_id: i64,
    pub group_id: i64,
    pub body: String,
    pub is_system: bool,
    pub idempotency_key: Option<String>,
}

impl NewMessage {
    /// Attach the sequence id and timestamp chosen by the store.
    pub fn into_message(self, seq: i64, timestamp: i64) -> Message {
        Message {
            room_id: self.room_id,
            seq,
            user_id: self.user_id,
            group_id: self.group_id,
            body: self.body,
            is_system: self.is_system,
            timestamp,
            idempotency_key: self.idempotency_key,
        }
    }
}

/// Join and leave events recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemEvent {
    Enter,
    Exit,
}

impl SystemEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemEvent::Enter => "enter",
            SystemEvent::Exit => "exit",
        }
    }
}

impl FromStr for SystemEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enter" => Ok(SystemEvent::Enter),
            "exit" => Ok(SystemEvent::Exit),
            other => Err(format!("unknown system event: {other}")),
        }
    }
}

/// Who a beep is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BeepTarget {
    User(i64),
    All,
}

impl BeepTarget {
    /// The stored body for a beep at this target.
    pub fn body(&self) -> String {
        format!("{BEEP_PREFIX}{self}")
    }

    /// Parse a stored message body. `None` if the body is not a beep.
    pub fn from_body(body: &str) -> Option<Self> {
        body.strip_prefix(BEEP_PREFIX)?.trim().parse().ok()
    }

    pub fn includes(&self, user_id: i64) -> bool {
        match self {
            BeepTarget::All => true,
            BeepTarget::User(id) => *id == user_id,
        }
    }
}

impl fmt::Display for BeepTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeepTarget::User(id) => write!(f, "{id}"),
            BeepTarget::All => f.write_str("all"),
        }
    }
}

impl FromStr for BeepTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(BeepTarget::All);
        }
        match s.parse::<i64>() {
            Ok(id) if id > 0 => Ok(BeepTarget::User(id)),
            _ => Err(format!("invalid beep target: {s}")),
        }
    }
}
