use async_trait::async_trait;

use crate::host::Clock;
use crate::models::message::{Message, NewMessage};
use crate::models::presence::PresenceEntry;
use crate::models::room::Room;

/// Errors raised by a [`ChatStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("room {0} does not exist")]
    MissingRoom(i64),
}

/// Result of an append. `duplicate` is set when an idempotency key matched a
/// message that was already stored; `message` is then the stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    pub message: Message,
    pub duplicate: bool,
}

/// Durable, ordered storage for rooms, presence and the message log.
///
/// Message queries filter by group visibility: a non-zero `group_id` limits
/// results to that group and group 0, while 0 returns every group. Results
/// are ordered by `(timestamp, seq)` ascending.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get_room(&self, room_id: i64) -> Result<Option<Room>, StoreError>;
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError>;
    async fn upsert_room(&self, room: &Room) -> Result<(), StoreError>;

    /// Insert a new entry. Returns `false` if the token is already taken.
    async fn insert_presence(&self, entry: &PresenceEntry) -> Result<bool, StoreError>;
    async fn find_presence(&self, token: &str) -> Result<Option<PresenceEntry>, StoreError>;
    /// Stamp liveness. `message_sent` also refreshes the last-message-sent
    /// time. Returns `false` if the token is unknown.
    async fn touch_presence(
        &self,
        token: &str,
        heartbeat: i64,
        message_sent: Option<i64>,
    ) -> Result<bool, StoreError>;
    async fn delete_presence(&self, token: &str) -> Result<Option<PresenceEntry>, StoreError>;
    /// Delete the entry only if both its heartbeat and last message are older
    /// than `cutoff`. A concurrent touch that lands first keeps it alive.
    async fn delete_presence_if_stale(
        &self,
        token: &str,
        cutoff: i64,
    ) -> Result<Option<PresenceEntry>, StoreError>;
    /// Every entry in the room, ordered by first-seen then token.
    async fn list_presence(&self, room_id: i64) -> Result<Vec<PresenceEntry>, StoreError>;

    /// Assign the next sequence id in the room, stamp the message and store
    /// it. The clock is read inside the room's append critical section and
    /// the stamp never goes below the room's previous one, so timestamps are
    /// non-decreasing in sequence order.
    async fn append_message(&self, message: NewMessage, clock: &dyn Clock) -> Result<AppendOutcome, StoreError>;
    async fn latest_message(&self, room_id: i64, group_id: i64) -> Result<Option<Message>, StoreError>;
    /// Messages with `timestamp > after`.
    async fn messages_after(
        &self,
        room_id: i64,
        group_id: i64,
        after: i64,
    ) -> Result<Vec<Message>, StoreError>;
    /// Messages with `start <= timestamp <= end`. A bound of 0 is open.
    async fn messages_between(
        &self,
        room_id: i64,
        group_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<Message>, StoreError>;
    /// Delete messages with `timestamp < cutoff`. Returns how many went.
    async fn purge_messages_before(&self, room_id: i64, cutoff: i64) -> Result<usize, StoreError>;
}
