//! Per-viewer annotation of log messages and presence entries.

use std::collections::HashMap;

use serde::Serialize;
use utoipa::ToSchema;

use crate::host::{UserDirectory, UserDisplay};
use crate::models::message::{BeepTarget, Message, ME_PREFIX};
use crate::models::presence::PresenceEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    System,
    Beep,
    Me,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BeepNotice {
    /// A user id, or `all`.
    pub target: String,
    /// Whether the viewer is among the beeped users.
    pub for_me: bool,
}

/// A message as one particular viewer receives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DeliveredMessage {
    pub seq: i64,
    pub user_id: i64,
    pub group_id: i64,
    pub timestamp: i64,
    pub kind: MessageKind,
    /// Body text. The event tag for system messages, the action for `/me`.
    pub text: String,
    /// Whether the viewer wrote it.
    pub mine: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beep: Option<BeepNotice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<UserDisplay>,
}

/// One user in the room roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RosterEntry {
    pub user_id: i64,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub first_seen: i64,
    /// Seconds since the user last posted.
    pub idle_secs: i64,
}

/// Classify a stored body. Returns the kind, the display text and the beep
/// target if any.
pub fn classify(message: &Message) -> (MessageKind, String, Option<BeepTarget>) {
    if message.is_system {
        return (MessageKind::System, message.body.clone(), None);
    }
    if let Some(target) = BeepTarget::from_body(&message.body) {
        return (MessageKind::Beep, message.body.clone(), Some(target));
    }
    if let Some(action) = message.body.strip_prefix(ME_PREFIX) {
        return (MessageKind::Me, action.to_string(), None);
    }
    (MessageKind::User, message.body.clone(), None)
}

/// Caches directory lookups for the duration of one response.
struct Authors<'a> {
    users: &'a dyn UserDirectory,
    seen: HashMap<i64, UserDisplay>,
}

impl<'a> Authors<'a> {
    fn new(users: &'a dyn UserDirectory) -> Self {
        Self {
            users,
            seen: HashMap::new(),
        }
    }

    async fn get(&mut self, user_id: i64) -> UserDisplay {
        if let Some(found) = self.seen.get(&user_id) {
            return found.clone();
        }
        let display = self.users.display(user_id).await;
        self.seen.insert(user_id, display.clone());
        display
    }
}

pub async fn deliver(
    messages: Vec<Message>,
    viewer_id: i64,
    users: &dyn UserDirectory,
) -> Vec<DeliveredMessage> {
    let mut authors = Authors::new(users);
    let mut delivered = Vec::with_capacity(messages.len());

    for message in messages {
        let (kind, text, target) = classify(&message);
        let author = if message.user_id == 0 {
            None
        } else {
            Some(authors.get(message.user_id).await)
        };
        delivered.push(DeliveredMessage {
            seq: message.seq,
            user_id: message.user_id,
            group_id: message.group_id,
            timestamp: message.timestamp,
            kind,
            text,
            mine: message.user_id != 0 && message.user_id == viewer_id,
            beep: target.map(|t| BeepNotice {
                target: t.to_string(),
                for_me: t.includes(viewer_id),
            }),
            author,
        });
    }

    delivered
}

/// Build the roster from presence entries already ordered by first-seen.
/// A user with several sessions is listed once.
pub async fn roster(entries: Vec<PresenceEntry>, now: i64, users: &dyn UserDirectory) -> Vec<RosterEntry> {
    let mut order: Vec<i64> = Vec::new();
    let mut spans: HashMap<i64, (i64, i64)> = HashMap::new();

    for entry in &entries {
        match spans.get_mut(&entry.user_id) {
            Some((first_seen, last_sent)) => {
                *first_seen = (*first_seen).min(entry.first_seen);
                *last_sent = (*last_sent).max(entry.last_message_sent);
            }
            None => {
                order.push(entry.user_id);
                spans.insert(entry.user_id, (entry.first_seen, entry.last_message_sent));
            }
        }
    }

    let mut authors = Authors::new(users);
    let mut roster = Vec::with_capacity(order.len());
    for user_id in order {
        let (first_seen, last_sent) = spans[&user_id];
        let display = authors.get(user_id).await;
        roster.push(RosterEntry {
            user_id,
            display_name: display.display_name,
            avatar_url: display.avatar_url,
            first_seen,
            idle_secs: (now - last_sent).max(0),
        });
    }
    roster
}
