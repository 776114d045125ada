//! Retroactive partitioning of a room's history into chat sessions.
//!
//! A session is a maximal run of messages in which no two consecutive
//! messages are more than `gap` seconds apart. Join and leave events bound
//! sessions like any other message but are not counted as chat.

use std::collections::BTreeMap;

use serde::Serialize;
use utoipa::ToSchema;

use crate::models::message::Message;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SessionUser {
    pub user_id: i64,
    pub message_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ChatSession {
    pub start: i64,
    pub end: i64,
    /// False while the room may still be in this session.
    pub is_complete: bool,
    /// Participants ordered by user id.
    pub users: Vec<SessionUser>,
}

struct OpenSession {
    start: i64,
    end: i64,
    counts: BTreeMap<i64, u32>,
}

impl OpenSession {
    fn begin(message: &Message) -> Self {
        let mut session = Self {
            start: message.timestamp,
            end: message.timestamp,
            counts: BTreeMap::new(),
        };
        session.count(message);
        session
    }

    fn count(&mut self, message: &Message) {
        if !message.is_system && message.user_id != 0 {
            *self.counts.entry(message.user_id).or_insert(0) += 1;
        }
    }

    fn close(self, is_complete: bool) -> ChatSession {
        ChatSession {
            start: self.start,
            end: self.end,
            is_complete,
            users: self
                .counts
                .into_iter()
                .map(|(user_id, message_count)| SessionUser {
                    user_id,
                    message_count,
                })
                .collect(),
        }
    }
}

/// Split `messages` into sessions, oldest first.
///
/// Only the last session can be incomplete: it is complete once `now` is
/// more than `gap` past its final message. Incomplete sessions are dropped
/// unless `show_all` is set.
pub fn segment(messages: &[Message], gap: i64, now: i64, show_all: bool) -> Vec<ChatSession> {
    let mut ordered: Vec<&Message> = messages.iter().collect();
    ordered.sort_by_key(|m| (m.timestamp, m.seq));

    let mut sessions = Vec::new();
    let mut open: Option<OpenSession> = None;

    for message in ordered {
        if let Some(current) = open.as_mut() {
            if message.timestamp - current.end <= gap {
                current.end = message.timestamp;
                current.count(message);
                continue;
            }
        }
        if let Some(done) = open.replace(OpenSession::begin(message)) {
            sessions.push(done.close(true));
        }
    }

    if let Some(last) = open {
        let is_complete = now - last.end > gap;
        if is_complete || show_all {
            sessions.push(last.close(is_complete));
        }
    }

    sessions
}
