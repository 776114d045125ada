//! Append-only, room-scoped message log.

use std::sync::Arc;

use crate::db::store::{AppendOutcome, ChatStore};
use crate::host::Clock;
use crate::models::message::{Message, NewMessage, SystemEvent};

use super::ChatError;

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// A message as submitted, before the log stamps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub room_id: i64,
    pub user_id: i64,
    pub group_id: i64,
    pub body: String,
    pub is_system: bool,
    pub idempotency_key: Option<String>,
}

impl MessageDraft {
    pub fn system(room_id: i64, user_id: i64, group_id: i64, event: SystemEvent) -> Self {
        Self {
            room_id,
            user_id,
            group_id,
            body: event.as_str().to_string(),
            is_system: true,
            idempotency_key: None,
        }
    }
}

#[derive(Clone)]
pub struct MessageLog {
    store: Arc<dyn ChatStore>,
    clock: Arc<dyn Clock>,
}

impl MessageLog {
    pub fn new(store: Arc<dyn ChatStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append the draft. The store picks the sequence id and stamps the time
    /// under its per-room lock.
    pub async fn append(&self, draft: MessageDraft) -> Result<AppendOutcome, ChatError> {
        let room_id = draft.room_id;
        let message = NewMessage {
            room_id: draft.room_id,
            user_id: draft.user_id,
            group_id: draft.group_id,
            body: draft.body,
            is_system: draft.is_system,
            idempotency_key: draft.idempotency_key,
        };
        let outcome = self
            .store
            .append_message(message, self.clock.as_ref())
            .await
            .map_err(|err| {
                tracing::error!(room_id, %err, "message append failed");
                ChatError::from(err)
            })?;

        if outcome.duplicate {
            tracing::debug!(room_id, seq = outcome.message.seq, "duplicate append ignored");
        }
        Ok(outcome)
    }

    pub async fn append_system(
        &self,
        room_id: i64,
        user_id: i64,
        group_id: i64,
        event: SystemEvent,
    ) -> Result<Message, ChatError> {
        let outcome = self
            .append(MessageDraft::system(room_id, user_id, group_id, event))
            .await?;
        Ok(outcome.message)
    }

    /// Highest `(timestamp, seq)` message visible to the group.
    pub async fn latest(&self, room_id: i64, group_id: i64) -> Result<Option<Message>, ChatError> {
        Ok(self.store.latest_message(room_id, group_id).await?)
    }

    /// Visible messages strictly newer than `cursor`.
    pub async fn since(&self, room_id: i64, group_id: i64, cursor: i64) -> Result<Vec<Message>, ChatError> {
        Ok(self.store.messages_after(room_id, group_id, cursor).await?)
    }

    /// Visible messages with `start <= timestamp <= end`. `0, 0` is the whole
    /// history.
    pub async fn range(
        &self,
        room_id: i64,
        group_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<Message>, ChatError> {
        Ok(self.store.messages_between(room_id, group_id, start, end).await?)
    }

    /// Drop messages older than `days`. `days <= 0` keeps everything.
    pub async fn purge_older_than(&self, room_id: i64, days: i32) -> Result<usize, ChatError> {
        if days <= 0 {
            return Ok(0);
        }
        let cutoff = self.clock.now() - i64::from(days) * SECS_PER_DAY;
        let purged = self.store.purge_messages_before(room_id, cutoff).await?;
        if purged > 0 {
            tracing::info!(room_id, purged, days, "purged old chat messages");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::harness;

    fn draft(room_id: i64, body: &str) -> MessageDraft {
        MessageDraft {
            room_id,
            user_id: 2,
            group_id: 0,
            body: body.to_string(),
            is_system: false,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn append_stamps_time_and_sequence() {
        let h = harness().await;
        h.clock.set(1_000);
        let a = h.engine.log().append(draft(h.room.id, "a")).await.unwrap();
        let b = h.engine.log().append(draft(h.room.id, "b")).await.unwrap();

        assert_eq!(a.message.timestamp, 1_000);
        assert!(b.message.seq > a.message.seq);
        assert!(!a.duplicate);
    }

    #[tokio::test]
    async fn append_to_unknown_room_is_not_found() {
        let h = harness().await;
        let err = h.engine.log().append(draft(999, "x")).await.unwrap_err();
        assert!(matches!(err, ChatError::RoomNotFound(999)));
    }

    #[tokio::test]
    async fn since_excludes_the_cursor_itself() {
        let h = harness().await;
        let log = h.engine.log();
        h.clock.set(100);
        log.append(draft(h.room.id, "at-100")).await.unwrap();
        h.clock.set(101);
        log.append(draft(h.room.id, "at-101")).await.unwrap();

        let delta = log.since(h.room.id, 0, 100).await.unwrap();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].body, "at-101");
    }

    #[tokio::test]
    async fn same_second_messages_keep_insertion_order() {
        let h = harness().await;
        let log = h.engine.log();
        h.clock.set(500);
        for body in ["one", "two", "three"] {
            log.append(draft(h.room.id, body)).await.unwrap();
        }

        let bodies: Vec<String> = log
            .range(h.room.id, 0, 0, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(bodies, ["one", "two", "three"]);
        assert_eq!(log.latest(h.room.id, 0).await.unwrap().unwrap().body, "three");
    }

    #[tokio::test]
    async fn purge_respects_keep_days() {
        let h = harness().await;
        let log = h.engine.log();
        h.clock.set(10 * SECS_PER_DAY);
        log.append(draft(h.room.id, "old")).await.unwrap();
        h.clock.set(13 * SECS_PER_DAY);
        log.append(draft(h.room.id, "new")).await.unwrap();

        assert_eq!(log.purge_older_than(h.room.id, 0).await.unwrap(), 0);
        assert_eq!(log.purge_older_than(h.room.id, 2).await.unwrap(), 1);

        let left = log.range(h.room.id, 0, 0, 0).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].body, "new");
    }

    #[tokio::test]
    async fn system_drafts_carry_event_tag() {
        let h = harness().await;
        let message = h
            .engine
            .log()
            .append_system(h.room.id, 4, 0, SystemEvent::Exit)
            .await
            .unwrap();
        assert!(message.is_system);
        assert_eq!(message.body, "exit");
        assert_eq!(message.system_event(), Some(SystemEvent::Exit));
    }
}
