//! Who is in a room right now.

use std::sync::Arc;

use crate::auth::tokens::TokenGenerator;
use crate::config::EvictionNotice;
use crate::db::store::ChatStore;
use crate::host::Clock;
use crate::models::message::SystemEvent;
use crate::models::presence::{Carrier, PresenceEntry};
use crate::models::room::Room;
use crate::models::visible_to;

use super::log::MessageLog;
use super::ChatError;

/// Attempts at finding an unused token before giving up.
const TOKEN_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct PresenceTable {
    store: Arc<dyn ChatStore>,
    clock: Arc<dyn Clock>,
    tokens: Arc<dyn TokenGenerator>,
    log: MessageLog,
    notice: EvictionNotice,
    basic_multiplier: i64,
}

impl PresenceTable {
    pub fn new(
        store: Arc<dyn ChatStore>,
        clock: Arc<dyn Clock>,
        tokens: Arc<dyn TokenGenerator>,
        log: MessageLog,
        notice: EvictionNotice,
        basic_multiplier: i64,
    ) -> Self {
        Self {
            store,
            clock,
            tokens,
            log,
            notice,
            basic_multiplier,
        }
    }

    /// Create a presence entry and announce the arrival in the log.
    pub async fn login(
        &self,
        room_id: i64,
        user_id: i64,
        group_id: i64,
        carrier: Carrier,
    ) -> Result<PresenceEntry, ChatError> {
        let now = self.clock.now();
        let mut entry = None;

        for _ in 0..TOKEN_ATTEMPTS {
            let token = self.tokens.generate().ok_or(ChatError::Allocation)?;
            let candidate = PresenceEntry {
                token,
                room_id,
                user_id,
                group_id,
                carrier,
                first_seen: now,
                last_heartbeat: now,
                last_message_sent: now,
            };
            if self.store.insert_presence(&candidate).await? {
                entry = Some(candidate);
                break;
            }
            tracing::warn!(room_id, user_id, "session token collision, retrying");
        }
        let entry = entry.ok_or(ChatError::Allocation)?;

        if let Err(err) = self
            .log
            .append_system(room_id, user_id, group_id, SystemEvent::Enter)
            .await
        {
            // Roll back so a retry starts from a clean slate.
            if let Err(rollback) = self.store.delete_presence(&entry.token).await {
                tracing::warn!(room_id, user_id, err = %rollback, "login rollback failed, session left behind");
            }
            return Err(err);
        }

        tracing::info!(room_id, user_id, group_id, %carrier, "chat login");
        Ok(entry)
    }

    /// Look up a live session.
    pub async fn resolve(&self, token: &str) -> Result<PresenceEntry, ChatError> {
        self.store
            .find_presence(token)
            .await?
            .ok_or(ChatError::NotLoggedIn)
    }

    pub async fn heartbeat(&self, token: &str) -> Result<(), ChatError> {
        self.stamp(token, false).await
    }

    /// Refresh liveness, and the last-message time if `sent` is set.
    pub(crate) async fn stamp(&self, token: &str, sent: bool) -> Result<(), ChatError> {
        let now = self.clock.now();
        let touched = self
            .store
            .touch_presence(token, now, sent.then_some(now))
            .await?;
        if touched {
            Ok(())
        } else {
            Err(ChatError::UnknownSession)
        }
    }

    /// End a session and announce the departure.
    pub async fn logout(&self, token: &str) -> Result<PresenceEntry, ChatError> {
        let entry = self
            .store
            .delete_presence(token)
            .await?
            .ok_or(ChatError::UnknownSession)?;

        self.log
            .append_system(entry.room_id, entry.user_id, entry.group_id, SystemEvent::Exit)
            .await?;

        tracing::info!(room_id = entry.room_id, user_id = entry.user_id, "chat logout");
        Ok(entry)
    }

    /// Remove every entry in the room that has been silent for longer than
    /// its eviction threshold. Returns the removed entries.
    pub async fn evict_stale(&self, room: &Room) -> Result<Vec<PresenceEntry>, ChatError> {
        let now = self.clock.now();
        let mut evicted = Vec::new();

        for entry in self.store.list_presence(room.id).await? {
            let cutoff = now - room.eviction_threshold(entry.carrier, self.basic_multiplier);
            if !entry.is_stale(cutoff) {
                continue;
            }
            if let Some(gone) = self.store.delete_presence_if_stale(&entry.token, cutoff).await? {
                evicted.push(gone);
            }
        }

        if evicted.is_empty() {
            return Ok(evicted);
        }

        tracing::info!(room_id = room.id, evicted = evicted.len(), "evicted stale chat sessions");

        if self.notice == EvictionNotice::Announce {
            for gone in &evicted {
                if let Err(err) = self
                    .log
                    .append_system(gone.room_id, gone.user_id, gone.group_id, SystemEvent::Exit)
                    .await
                {
                    tracing::warn!(room_id = room.id, user_id = gone.user_id, %err, "eviction notice failed");
                }
            }
        }

        Ok(evicted)
    }

    /// Entries visible to the group, longest-present first.
    pub async fn list(&self, room_id: i64, group_id: i64) -> Result<Vec<PresenceEntry>, ChatError> {
        let mut entries = self.store.list_presence(room_id).await?;
        entries.retain(|e| visible_to(group_id, e.group_id));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens::RandomTokenGenerator;
    use crate::config::EngineConfig;
    use crate::db::MemoryStore;
    use crate::engine::testing::{harness, harness_with, Script, ScriptedStore};
    use crate::host::ManualClock;

    struct NoTokens;

    impl TokenGenerator for NoTokens {
        fn generate(&self) -> Option<String> {
            None
        }
    }

    struct FixedToken;

    impl TokenGenerator for FixedToken {
        fn generate(&self) -> Option<String> {
            Some("cs_fixed".to_string())
        }
    }

    #[tokio::test]
    async fn login_creates_entry_and_enter_event() {
        let h = harness().await;
        h.clock.set(1_000);

        let entry = h
            .engine
            .presence()
            .login(h.room.id, 5, 0, Carrier::Poll)
            .await
            .unwrap();
        assert!(entry.token.starts_with("cs_"));
        assert_eq!(
            (entry.first_seen, entry.last_heartbeat, entry.last_message_sent),
            (1_000, 1_000, 1_000)
        );

        let log = h.engine.log().range(h.room.id, 0, 0, 0).await.unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].is_system);
        assert_eq!(log[0].body, "enter");
        assert_eq!(log[0].user_id, 5);
    }

    #[tokio::test]
    async fn same_user_may_hold_several_sessions() {
        let h = harness().await;
        let presence = h.engine.presence();
        let a = presence.login(h.room.id, 5, 0, Carrier::Poll).await.unwrap();
        let b = presence.login(h.room.id, 5, 0, Carrier::Push).await.unwrap();

        assert_ne!(a.token, b.token);
        assert_eq!(presence.list(h.room.id, 0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn login_to_unknown_room_fails() {
        let h = harness().await;
        let err = h.engine.presence().login(77, 5, 0, Carrier::Poll).await.unwrap_err();
        assert!(matches!(err, ChatError::RoomNotFound(77)));
    }

    #[tokio::test]
    async fn login_without_tokens_is_allocation_error() {
        let h = harness().await;
        let presence = PresenceTable::new(
            h.store.clone(),
            h.clock.clone(),
            Arc::new(NoTokens),
            h.engine.log().clone(),
            EvictionNotice::Silent,
            10,
        );
        let err = presence.login(h.room.id, 5, 0, Carrier::Poll).await.unwrap_err();
        assert!(matches!(err, ChatError::Allocation));
    }

    #[tokio::test]
    async fn login_gives_up_after_repeated_collisions() {
        let h = harness().await;
        let presence = PresenceTable::new(
            h.store.clone(),
            h.clock.clone(),
            Arc::new(FixedToken),
            h.engine.log().clone(),
            EvictionNotice::Silent,
            10,
        );
        presence.login(h.room.id, 5, 0, Carrier::Poll).await.unwrap();
        let err = presence.login(h.room.id, 6, 0, Carrier::Poll).await.unwrap_err();
        assert!(matches!(err, ChatError::Allocation));
    }

    #[tokio::test]
    async fn failed_enter_event_rolls_back_the_entry() {
        let h = harness().await;
        // The log has no rooms, so the enter event cannot be written.
        let log = MessageLog::new(Arc::new(MemoryStore::new()), h.clock.clone());
        let presence = PresenceTable::new(
            h.store.clone(),
            h.clock.clone(),
            Arc::new(RandomTokenGenerator),
            log,
            EvictionNotice::Silent,
            10,
        );

        let err = presence.login(h.room.id, 5, 0, Carrier::Poll).await.unwrap_err();
        assert!(matches!(err, ChatError::RoomNotFound(1)));
        assert!(h.store.list_presence(h.room.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_rollback_reports_the_original_error() {
        let store = ScriptedStore::new(Script::FailLogin).await;
        let engine = crate::engine::ChatEngine::builder(store.clone())
            .clock(Arc::new(ManualClock::new(100)))
            .build();

        let err = engine.presence().login(1, 5, 0, Carrier::Poll).await.unwrap_err();
        match err {
            ChatError::Storage(detail) => assert!(detail.contains("disk full"), "{detail}"),
            other => panic!("unexpected error: {other:?}"),
        }
        // The entry outlives the failed rollback.
        assert_eq!(store.inner.list_presence(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn heartbeat_unknown_token() {
        let h = harness().await;
        let err = h.engine.presence().heartbeat("cs_nope").await.unwrap_err();
        assert!(matches!(err, ChatError::UnknownSession));
    }

    #[tokio::test]
    async fn resolve_unknown_token_is_not_logged_in() {
        let h = harness().await;
        let err = h.engine.presence().resolve("cs_nope").await.unwrap_err();
        assert!(matches!(err, ChatError::NotLoggedIn));
    }

    #[tokio::test]
    async fn eviction_removes_only_silent_entries() {
        let h = harness().await;
        let presence = h.engine.presence();
        let threshold = h.room.eviction_secs;

        h.clock.set(1_000);
        let silent = presence.login(h.room.id, 1, 0, Carrier::Poll).await.unwrap();
        let beating = presence.login(h.room.id, 2, 0, Carrier::Poll).await.unwrap();
        let talking = presence.login(h.room.id, 3, 0, Carrier::Poll).await.unwrap();

        h.clock.set(1_000 + threshold);
        presence.heartbeat(&beating.token).await.unwrap();
        presence.stamp(&talking.token, true).await.unwrap();
        // Exactly at the threshold nobody is stale yet.
        assert!(presence.evict_stale(&h.room).await.unwrap().is_empty());

        h.clock.set(1_000 + threshold + 1);
        let evicted = presence.evict_stale(&h.room).await.unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].token, silent.token);

        let mut left: Vec<i64> = presence
            .list(h.room.id, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.user_id)
            .collect();
        left.sort();
        assert_eq!(left, [2, 3]);
    }

    #[tokio::test]
    async fn message_activity_keeps_a_lagging_heartbeat_alive() {
        let h = harness().await;
        let presence = h.engine.presence();
        let threshold = h.room.eviction_secs;

        h.clock.set(1_000);
        let talker = presence.login(h.room.id, 1, 0, Carrier::Poll).await.unwrap();
        h.clock.set(1_000 + threshold);
        h.store
            .touch_presence(&talker.token, 1_000, Some(1_000 + threshold))
            .await
            .unwrap();

        h.clock.set(1_000 + threshold + 5);
        assert!(presence.evict_stale(&h.room).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn basic_carrier_gets_longer_threshold() {
        let h = harness().await;
        let presence = h.engine.presence();

        h.clock.set(1_000);
        presence.login(h.room.id, 1, 0, Carrier::Basic).await.unwrap();
        h.clock.set(1_000 + h.room.eviction_secs * 5);
        assert!(presence.evict_stale(&h.room).await.unwrap().is_empty());

        h.clock.set(1_000 + h.room.eviction_secs * 10 + 1);
        assert_eq!(presence.evict_stale(&h.room).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn eviction_is_silent_by_default() {
        let h = harness().await;
        h.clock.set(1_000);
        h.engine.presence().login(h.room.id, 1, 0, Carrier::Poll).await.unwrap();
        h.clock.set(1_000 + h.room.eviction_secs + 1);
        h.engine.presence().evict_stale(&h.room).await.unwrap();

        let log = h.engine.log().range(h.room.id, 0, 0, 0).await.unwrap();
        assert_eq!(log.len(), 1, "only the enter event");
    }

    #[tokio::test]
    async fn announce_policy_appends_exit_per_eviction() {
        let h = harness_with(EngineConfig {
            eviction_notice: EvictionNotice::Announce,
            ..EngineConfig::default()
        })
        .await;
        h.clock.set(1_000);
        h.engine.presence().login(h.room.id, 1, 0, Carrier::Poll).await.unwrap();
        h.engine.presence().login(h.room.id, 2, 0, Carrier::Poll).await.unwrap();
        h.clock.set(1_000 + h.room.eviction_secs + 1);
        h.engine.presence().evict_stale(&h.room).await.unwrap();

        let exits: Vec<i64> = h
            .engine
            .log()
            .range(h.room.id, 0, 0, 0)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.system_event() == Some(SystemEvent::Exit))
            .map(|m| m.user_id)
            .collect();
        assert_eq!(exits.len(), 2);
        assert!(exits.contains(&1) && exits.contains(&2));
    }

    #[tokio::test]
    async fn eviction_is_idempotent() {
        let h = harness().await;
        h.clock.set(1_000);
        h.engine.presence().login(h.room.id, 1, 0, Carrier::Poll).await.unwrap();
        h.clock.set(1_000 + h.room.eviction_secs + 1);

        assert_eq!(h.engine.presence().evict_stale(&h.room).await.unwrap().len(), 1);
        assert!(h.engine.presence().evict_stale(&h.room).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_orders_by_first_seen_and_filters_groups() {
        let h = harness().await;
        let presence = h.engine.presence();

        h.clock.set(10);
        presence.login(h.room.id, 1, 3, Carrier::Poll).await.unwrap();
        h.clock.set(20);
        presence.login(h.room.id, 2, 0, Carrier::Poll).await.unwrap();
        h.clock.set(30);
        presence.login(h.room.id, 3, 4, Carrier::Poll).await.unwrap();

        let users = |entries: Vec<PresenceEntry>| entries.into_iter().map(|e| e.user_id).collect::<Vec<_>>();
        assert_eq!(users(presence.list(h.room.id, 0).await.unwrap()), [1, 2, 3]);
        assert_eq!(users(presence.list(h.room.id, 3).await.unwrap()), [1, 2]);
        assert_eq!(users(presence.list(h.room.id, 4).await.unwrap()), [2, 3]);
    }

    #[tokio::test]
    async fn logout_removes_entry_and_emits_exit() {
        let h = harness().await;
        let presence = h.engine.presence();
        let entry = presence.login(h.room.id, 9, 0, Carrier::Poll).await.unwrap();

        presence.logout(&entry.token).await.unwrap();
        assert!(presence.list(h.room.id, 0).await.unwrap().is_empty());

        let last = h.engine.log().latest(h.room.id, 0).await.unwrap().unwrap();
        assert_eq!(last.system_event(), Some(SystemEvent::Exit));
        assert_eq!(last.user_id, 9);

        assert!(matches!(
            presence.logout(&entry.token).await,
            Err(ChatError::UnknownSession)
        ));
    }
}
