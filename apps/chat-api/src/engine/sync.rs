//! One client round-trip: evict, post, compute the delta, advance the cursor.

use serde::Serialize;
use utoipa::ToSchema;

use crate::host::SanitizeContext;
use crate::models::message::BeepTarget;
use crate::models::presence::PresenceEntry;

use super::log::MessageDraft;
use super::render::{self, DeliveredMessage, RosterEntry};
use super::{ChatEngine, ChatError};

/// What a client sends on each round-trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRequest {
    pub session_token: String,
    /// Text to post, if any.
    pub message: Option<String>,
    /// Beep instead of posting text. Wins over `message`.
    pub beep: Option<BeepTarget>,
    /// Timestamp returned by the previous sync, 0 on the first one.
    pub cursor: i64,
    /// Row parity returned by the previous sync.
    pub row_parity: u8,
    /// Client key that makes a retried post land only once.
    pub idempotency_key: Option<String>,
}

impl SyncRequest {
    pub fn poll(session_token: impl Into<String>, cursor: i64, row_parity: u8) -> Self {
        Self {
            session_token: session_token.into(),
            cursor,
            row_parity,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SyncResult {
    pub room_id: i64,
    /// Messages newer than the request cursor, oldest first.
    pub messages: Vec<DeliveredMessage>,
    /// Cursor for the next round-trip.
    pub cursor: i64,
    pub row_parity: u8,
    /// Fresh roster, present when someone joined or left.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<RosterEntry>>,
    /// Sequence id of the message posted by this request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<i64>,
}

impl SyncResult {
    /// Whether there is nothing new for the client.
    pub fn is_idle(&self) -> bool {
        self.messages.is_empty() && self.users.is_none() && self.sent.is_none()
    }
}

impl ChatEngine {
    pub async fn sync(&self, req: SyncRequest) -> Result<SyncResult, ChatError> {
        let session = self.presence.resolve(&req.session_token).await?;
        let room = self.room(session.room_id).await?;
        let now = self.clock.now();

        if now - req.cursor > room.eviction_secs {
            match self.presence.evict_stale(&room).await {
                Ok(evicted) if evicted.iter().any(|e| e.token == session.token) => {
                    return Err(ChatError::UnknownSession);
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(room_id = room.id, %err, "eviction during sync failed");
                }
            }
        }

        let sent = match self.compose_body(&session, &req)? {
            Some(body) => {
                // A fresh last-sent stamp keeps a concurrent sweep off this
                // session while the message is in flight.
                self.presence.stamp(&session.token, true).await?;
                let outcome = self
                    .log
                    .append(MessageDraft {
                        room_id: room.id,
                        user_id: session.user_id,
                        group_id: session.group_id,
                        body,
                        is_system: false,
                        idempotency_key: req.idempotency_key.clone(),
                    })
                    .await?;
                Some(outcome.message.seq)
            }
            None => None,
        };

        let latest_ts = self
            .log
            .latest(room.id, session.group_id)
            .await?
            .map_or(0, |m| m.timestamp);

        let cursor = if req.cursor == 0 {
            now - room.eviction_secs
        } else {
            req.cursor
        };
        let delta = self.log.since(room.id, session.group_id, cursor).await?;

        let users = if delta.iter().any(|m| m.is_system) {
            let entries = self.presence.list(room.id, session.group_id).await?;
            Some(render::roster(entries, now, self.users.as_ref()).await)
        } else {
            None
        };

        let row_parity = ((usize::from(req.row_parity) + delta.len()) % 2) as u8;

        self.presence.stamp(&session.token, false).await?;

        // A message landing between the two reads is already in the delta and
        // must not be re-sent next time.
        let next_cursor = delta
            .iter()
            .map(|m| m.timestamp)
            .fold(latest_ts, i64::max);

        tracing::debug!(
            room_id = room.id,
            user_id = session.user_id,
            delivered = delta.len(),
            cursor = next_cursor,
            "chat sync"
        );

        Ok(SyncResult {
            room_id: room.id,
            messages: render::deliver(delta, session.user_id, self.users.as_ref()).await,
            cursor: next_cursor,
            row_parity,
            users,
            sent,
        })
    }

    /// The body to append for this request, if any.
    fn compose_body(&self, session: &PresenceEntry, req: &SyncRequest) -> Result<Option<String>, ChatError> {
        if let Some(target) = req.beep {
            return Ok(Some(target.body()));
        }

        let Some(raw) = req.message.as_deref() else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }

        let max = self.config.max_message_len;
        if raw.chars().count() > max {
            return Err(ChatError::InvalidMessage(format!(
                "message must be {max} characters or fewer"
            )));
        }

        let ctx = SanitizeContext {
            room_id: session.room_id,
            user_id: session.user_id,
        };
        let body = self.sanitizer.sanitize(raw, &ctx);
        Ok((!body.is_empty()).then_some(body))
    }
}
