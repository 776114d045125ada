//! Room chat engine: presence, the message log and the sync round-trip.
//!
//! Carriers (HTTP polling, the WebSocket gateway, the maintenance binary)
//! all go through [`ChatEngine`]. It owns no transport state.

pub mod error;
pub mod log;
pub mod maintenance;
pub mod presence;
pub mod render;
pub mod report;
pub mod segmenter;
pub mod sync;

use std::sync::Arc;

use crate::auth::tokens::{RandomTokenGenerator, TokenGenerator};
use crate::config::EngineConfig;
use crate::db::store::ChatStore;
use crate::host::{
    Clock, HtmlSanitizer, MemoryUserDirectory, SystemClock, TextSanitizer, UserDirectory,
};
use crate::models::room::Room;

pub use error::ChatError;
pub use log::{MessageDraft, MessageLog};
pub use maintenance::{Maintenance, SweepReport};
pub use presence::PresenceTable;
pub use render::{DeliveredMessage, MessageKind, RosterEntry};
pub use segmenter::{ChatSession, SessionUser};
pub use sync::{SyncRequest, SyncResult};

#[derive(Clone)]
pub struct ChatEngine {
    store: Arc<dyn ChatStore>,
    clock: Arc<dyn Clock>,
    sanitizer: Arc<dyn TextSanitizer>,
    users: Arc<dyn UserDirectory>,
    log: MessageLog,
    presence: PresenceTable,
    config: EngineConfig,
}

impl ChatEngine {
    pub fn builder(store: Arc<dyn ChatStore>) -> ChatEngineBuilder {
        ChatEngineBuilder {
            store,
            clock: Arc::new(SystemClock),
            tokens: Arc::new(RandomTokenGenerator),
            sanitizer: Arc::new(HtmlSanitizer),
            users: Arc::new(MemoryUserDirectory::new()),
            config: EngineConfig::default(),
        }
    }

    pub fn presence(&self) -> &PresenceTable {
        &self.presence
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn users(&self) -> &Arc<dyn UserDirectory> {
        &self.users
    }

    pub async fn room(&self, room_id: i64) -> Result<Room, ChatError> {
        self.store
            .get_room(room_id)
            .await?
            .ok_or(ChatError::RoomNotFound(room_id))
    }

    /// Users present in the caller's room, as the caller's group sees them.
    pub async fn roster(&self, session_token: &str) -> Result<Vec<RosterEntry>, ChatError> {
        let session = self.presence.resolve(session_token).await?;
        let entries = self.presence.list(session.room_id, session.group_id).await?;
        Ok(render::roster(entries, self.clock.now(), self.users.as_ref()).await)
    }

    pub async fn rooms(&self) -> Result<Vec<Room>, ChatError> {
        Ok(self.store.list_rooms().await?)
    }

    /// Register a room, or update its settings if it already exists.
    pub async fn register_room(&self, room: &Room) -> Result<(), ChatError> {
        self.store.upsert_room(room).await?;
        tracing::info!(room_id = room.id, name = %room.name, eviction_secs = room.eviction_secs, "chat room registered");
        Ok(())
    }
}

pub struct ChatEngineBuilder {
    store: Arc<dyn ChatStore>,
    clock: Arc<dyn Clock>,
    tokens: Arc<dyn TokenGenerator>,
    sanitizer: Arc<dyn TextSanitizer>,
    users: Arc<dyn UserDirectory>,
    config: EngineConfig,
}

impl ChatEngineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn tokens(mut self, tokens: Arc<dyn TokenGenerator>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn sanitizer(mut self, sanitizer: Arc<dyn TextSanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn users(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = users;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ChatEngine {
        let log = MessageLog::new(self.store.clone(), self.clock.clone());
        let presence = PresenceTable::new(
            self.store.clone(),
            self.clock.clone(),
            self.tokens,
            log.clone(),
            self.config.eviction_notice,
            self.config.basic_eviction_multiplier,
        );
        ChatEngine {
            store: self.store,
            clock: self.clock,
            sanitizer: self.sanitizer,
            users: self.users,
            log,
            presence,
            config: self.config,
        }
    }
}
