//! In-process [`ChatStore`] used when no database is configured and in tests.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::db::store::{AppendOutcome, ChatStore, StoreError};
use crate::host::Clock;
use crate::models::message::{Message, NewMessage};
use crate::models::presence::PresenceEntry;
use crate::models::room::Room;
use crate::models::visible_to;

/// Per-room message log. The mutex is the room's append critical section.
#[derive(Default)]
struct RoomLog {
    last_seq: i64,
    last_ts: i64,
    messages: Vec<Message>,
}

struct RoomSlot {
    room: Room,
    log: Mutex<RoomLog>,
}

/// DashMap-backed store. Rooms, presence and messages live only as long as
/// the process.
#[derive(Default)]
pub struct MemoryStore {
    rooms: DashMap<i64, RoomSlot>,
    presence: DashMap<String, PresenceEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn append_sync(&self, new: NewMessage, clock: &dyn Clock) -> Result<AppendOutcome, StoreError> {
        let slot = self
            .rooms
            .get(&new.room_id)
            .ok_or(StoreError::MissingRoom(new.room_id))?;
        let mut log = slot.log.lock();

        if let Some(key) = new.idempotency_key.as_deref() {
            let existing = log
                .messages
                .iter()
                .find(|m| m.user_id == new.user_id && m.idempotency_key.as_deref() == Some(key));
            if let Some(message) = existing {
                return Ok(AppendOutcome {
                    message: message.clone(),
                    duplicate: true,
                });
            }
        }

        log.last_seq += 1;
        log.last_ts = clock.now().max(log.last_ts);
        let message = new.into_message(log.last_seq, log.last_ts);
        log.messages.push(message.clone());

        Ok(AppendOutcome {
            message,
            duplicate: false,
        })
    }

    fn select(&self, room_id: i64, group_id: i64, keep: impl Fn(&Message) -> bool) -> Vec<Message> {
        let Some(slot) = self.rooms.get(&room_id) else {
            return Vec::new();
        };
        let log = slot.log.lock();
        let mut selected: Vec<Message> = log
            .messages
            .iter()
            .filter(|m| visible_to(group_id, m.group_id) && keep(*m))
            .cloned()
            .collect();
        selected.sort_by_key(|m| (m.timestamp, m.seq));
        selected
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn get_room(&self, room_id: i64) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.get(&room_id).map(|slot| slot.room.clone()))
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let mut rooms: Vec<Room> = self.rooms.iter().map(|slot| slot.room.clone()).collect();
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn upsert_room(&self, room: &Room) -> Result<(), StoreError> {
        self.rooms
            .entry(room.id)
            .and_modify(|slot| slot.room = room.clone())
            .or_insert_with(|| RoomSlot {
                room: room.clone(),
                log: Mutex::new(RoomLog::default()),
            });
        Ok(())
    }

    async fn insert_presence(&self, entry: &PresenceEntry) -> Result<bool, StoreError> {
        if !self.rooms.contains_key(&entry.room_id) {
            return Err(StoreError::MissingRoom(entry.room_id));
        }
        match self.presence.entry(entry.token.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
                Ok(true)
            }
        }
    }

    async fn find_presence(&self, token: &str) -> Result<Option<PresenceEntry>, StoreError> {
        Ok(self.presence.get(token).map(|e| e.clone()))
    }

    async fn touch_presence(
        &self,
        token: &str,
        heartbeat: i64,
        message_sent: Option<i64>,
    ) -> Result<bool, StoreError> {
        match self.presence.get_mut(token) {
            Some(mut entry) => {
                entry.last_heartbeat = heartbeat;
                if let Some(sent) = message_sent {
                    entry.last_message_sent = sent;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_presence(&self, token: &str) -> Result<Option<PresenceEntry>, StoreError> {
        Ok(self.presence.remove(token).map(|(_, entry)| entry))
    }

    async fn delete_presence_if_stale(
        &self,
        token: &str,
        cutoff: i64,
    ) -> Result<Option<PresenceEntry>, StoreError> {
        Ok(self
            .presence
            .remove_if(token, |_, entry| entry.is_stale(cutoff))
            .map(|(_, entry)| entry))
    }

    async fn list_presence(&self, room_id: i64) -> Result<Vec<PresenceEntry>, StoreError> {
        let mut entries: Vec<PresenceEntry> = self
            .presence
            .iter()
            .filter(|e| e.room_id == room_id)
            .map(|e| e.clone())
            .collect();
        entries.sort_by(|a, b| {
            a.first_seen
                .cmp(&b.first_seen)
                .then_with(|| a.token.cmp(&b.token))
        });
        Ok(entries)
    }

    async fn append_message(&self, message: NewMessage, clock: &dyn Clock) -> Result<AppendOutcome, StoreError> {
        self.append_sync(message, clock)
    }

    async fn latest_message(&self, room_id: i64, group_id: i64) -> Result<Option<Message>, StoreError> {
        Ok(self.select(room_id, group_id, |_| true).pop())
    }

    async fn messages_after(
        &self,
        room_id: i64,
        group_id: i64,
        after: i64,
    ) -> Result<Vec<Message>, StoreError> {
        Ok(self.select(room_id, group_id, |m| m.timestamp > after))
    }

    async fn messages_between(
        &self,
        room_id: i64,
        group_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<Message>, StoreError> {
        Ok(self.select(room_id, group_id, |m| {
            (start == 0 || m.timestamp >= start) && (end == 0 || m.timestamp <= end)
        }))
    }

    async fn purge_messages_before(&self, room_id: i64, cutoff: i64) -> Result<usize, StoreError> {
        let Some(slot) = self.rooms.get(&room_id) else {
            return Ok(0);
        };
        let mut log = slot.log.lock();
        let before = log.messages.len();
        log.messages.retain(|m| m.timestamp >= cutoff);
        Ok(before - log.messages.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::host::ManualClock;
    use crate::models::presence::Carrier;

    fn new_message(room_id: i64, group_id: i64, body: &str) -> NewMessage {
        NewMessage {
            room_id,
            user_id: 7,
            group_id,
            body: body.to_string(),
            is_system: false,
            idempotency_key: None,
        }
    }

    async fn append_at(
        store: &MemoryStore,
        now: i64,
        message: NewMessage,
    ) -> Result<AppendOutcome, StoreError> {
        store.append_message(message, &ManualClock::new(now)).await
    }

    fn entry(token: &str, room_id: i64, first_seen: i64) -> PresenceEntry {
        PresenceEntry {
            token: token.to_string(),
            room_id,
            user_id: 1,
            group_id: 0,
            carrier: Carrier::Poll,
            first_seen,
            last_heartbeat: first_seen,
            last_message_sent: first_seen,
        }
    }

    async fn store_with_rooms(ids: &[i64]) -> MemoryStore {
        let store = MemoryStore::new();
        for id in ids {
            store.upsert_room(&Room::new(*id, "room", 300)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn sequence_ids_are_per_room() {
        let store = store_with_rooms(&[1, 2]).await;

        let a = append_at(&store, 10, new_message(1, 0, "a")).await.unwrap();
        let b = append_at(&store, 10, new_message(1, 0, "b")).await.unwrap();
        let c = append_at(&store, 10, new_message(2, 0, "c")).await.unwrap();

        assert_eq!(a.message.seq, 1);
        assert_eq!(b.message.seq, 2);
        assert_eq!(c.message.seq, 1);
    }

    #[tokio::test]
    async fn append_to_unknown_room_fails() {
        let store = MemoryStore::new();
        let err = append_at(&store, 1, new_message(9, 0, "x")).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingRoom(9)));
    }

    #[tokio::test]
    async fn upsert_keeps_existing_log() {
        let store = store_with_rooms(&[1]).await;
        append_at(&store, 10, new_message(1, 0, "a")).await.unwrap();

        store
            .upsert_room(&Room::new(1, "renamed", 60).with_keep_days(3))
            .await
            .unwrap();

        let room = store.get_room(1).await.unwrap().unwrap();
        assert_eq!(room.name, "renamed");
        assert_eq!(room.keep_days, 3);
        assert_eq!(store.messages_after(1, 0, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn idempotency_key_returns_stored_message() {
        let store = store_with_rooms(&[1]).await;
        let mut first = new_message(1, 0, "hello");
        first.idempotency_key = Some("k1".to_string());
        let retry = first.clone();

        let a = append_at(&store, 10, first).await.unwrap();
        let b = append_at(&store, 12, retry).await.unwrap();

        assert!(!a.duplicate);
        assert!(b.duplicate);
        assert_eq!(a.message, b.message);
        assert_eq!(store.messages_after(1, 0, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_second_messages_order_by_seq() {
        let store = store_with_rooms(&[1]).await;
        append_at(&store, 10, new_message(1, 0, "tie-1")).await.unwrap();
        append_at(&store, 10, new_message(1, 0, "tie-2")).await.unwrap();
        append_at(&store, 20, new_message(1, 0, "late")).await.unwrap();

        let bodies: Vec<String> = store
            .messages_after(1, 0, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(bodies, ["tie-1", "tie-2", "late"]);

        let latest = store.latest_message(1, 0).await.unwrap().unwrap();
        assert_eq!(latest.body, "late");
    }

    #[tokio::test]
    async fn stamps_never_go_below_the_previous_message() {
        let store = store_with_rooms(&[1]).await;
        let first = append_at(&store, 50, new_message(1, 0, "first")).await.unwrap();
        // A clock that stepped back still stamps at the room's last time.
        let second = append_at(&store, 40, new_message(1, 0, "second")).await.unwrap();

        assert_eq!(first.message.timestamp, 50);
        assert_eq!(second.message.timestamp, 50);
        assert!(second.message.seq > first.message.seq);
        assert_eq!(store.messages_after(1, 0, 49).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_get_distinct_ordered_slots() {
        let store = Arc::new(store_with_rooms(&[1]).await);
        let clock = Arc::new(ManualClock::new(1_000));

        let mut tasks = Vec::new();
        for i in 0..64 {
            let store = store.clone();
            let clock = clock.clone();
            tasks.push(tokio::spawn(async move {
                clock.advance(i % 3);
                store
                    .append_message(new_message(1, 0, &format!("m{i}")), clock.as_ref())
                    .await
                    .unwrap()
                    .message
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let log = store.messages_between(1, 0, 0, 0).await.unwrap();
        assert_eq!(log.len(), 64);
        let seqs: Vec<i64> = log.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, (1..=64).collect::<Vec<i64>>());
        assert!(log.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn group_filter_applies_to_queries() {
        let store = store_with_rooms(&[1]).await;
        append_at(&store, 10, new_message(1, 0, "everyone")).await.unwrap();
        append_at(&store, 11, new_message(1, 3, "group three")).await.unwrap();
        append_at(&store, 12, new_message(1, 4, "group four")).await.unwrap();

        assert_eq!(store.messages_after(1, 0, 0).await.unwrap().len(), 3);
        let three: Vec<String> = store
            .messages_after(1, 3, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(three, ["everyone", "group three"]);
        assert_eq!(store.latest_message(1, 3).await.unwrap().unwrap().body, "group three");
    }

    #[tokio::test]
    async fn between_treats_zero_bounds_as_open() {
        let store = store_with_rooms(&[1]).await;
        for ts in [10, 20, 30] {
            append_at(&store, ts, new_message(1, 0, "m")).await.unwrap();
        }

        assert_eq!(store.messages_between(1, 0, 0, 0).await.unwrap().len(), 3);
        assert_eq!(store.messages_between(1, 0, 20, 30).await.unwrap().len(), 2);
        assert_eq!(store.messages_between(1, 0, 0, 20).await.unwrap().len(), 2);
        assert_eq!(store.messages_between(1, 0, 20, 20).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_only_older_messages() {
        let store = store_with_rooms(&[1]).await;
        for ts in [10, 20, 30] {
            append_at(&store, ts, new_message(1, 0, "m")).await.unwrap();
        }

        assert_eq!(store.purge_messages_before(1, 20).await.unwrap(), 1);
        assert_eq!(store.messages_after(1, 0, 0).await.unwrap().len(), 2);
        // Sequence ids keep growing after a purge.
        let next = append_at(&store, 40, new_message(1, 0, "n")).await.unwrap();
        assert_eq!(next.message.seq, 4);
    }

    #[tokio::test]
    async fn presence_insert_rejects_taken_token() {
        let store = store_with_rooms(&[1]).await;
        assert!(store.insert_presence(&entry("cs_a", 1, 10)).await.unwrap());
        assert!(!store.insert_presence(&entry("cs_a", 1, 20)).await.unwrap());
        assert_eq!(store.find_presence("cs_a").await.unwrap().unwrap().first_seen, 10);
    }

    #[tokio::test]
    async fn presence_insert_requires_room() {
        let store = MemoryStore::new();
        let err = store.insert_presence(&entry("cs_a", 5, 10)).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingRoom(5)));
    }

    #[tokio::test]
    async fn touch_updates_timestamps() {
        let store = store_with_rooms(&[1]).await;
        store.insert_presence(&entry("cs_a", 1, 10)).await.unwrap();

        assert!(store.touch_presence("cs_a", 15, None).await.unwrap());
        let e = store.find_presence("cs_a").await.unwrap().unwrap();
        assert_eq!((e.last_heartbeat, e.last_message_sent), (15, 10));

        assert!(store.touch_presence("cs_a", 16, Some(16)).await.unwrap());
        let e = store.find_presence("cs_a").await.unwrap().unwrap();
        assert_eq!((e.last_heartbeat, e.last_message_sent), (16, 16));

        assert!(!store.touch_presence("cs_missing", 16, None).await.unwrap());
    }

    #[tokio::test]
    async fn conditional_delete_spares_fresh_entries() {
        let store = store_with_rooms(&[1]).await;
        store.insert_presence(&entry("cs_a", 1, 10)).await.unwrap();

        assert!(store.delete_presence_if_stale("cs_a", 10).await.unwrap().is_none());
        assert!(store.delete_presence_if_stale("cs_a", 11).await.unwrap().is_some());
        assert!(store.find_presence("cs_a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn presence_lists_by_first_seen_then_token() {
        let store = store_with_rooms(&[1, 2]).await;
        store.insert_presence(&entry("cs_c", 1, 20)).await.unwrap();
        store.insert_presence(&entry("cs_b", 1, 10)).await.unwrap();
        store.insert_presence(&entry("cs_a", 1, 20)).await.unwrap();
        store.insert_presence(&entry("cs_z", 2, 1)).await.unwrap();

        let tokens: Vec<String> = store
            .list_presence(1)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.token)
            .collect();
        assert_eq!(tokens, ["cs_b", "cs_a", "cs_c"]);
    }
}
