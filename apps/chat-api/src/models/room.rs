use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::schema::chat_rooms;

use super::presence::Carrier;

/// A chat room as registered by the host's configuration layer.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = chat_rooms)]
pub struct Room {
    pub id: i64,
    pub name: String,
    /// Seconds of silence before a presence entry is evicted.
    pub eviction_secs: i64,
    /// Days of history to keep. 0 keeps everything.
    pub keep_days: i32,
}

impl Room {
    pub fn new(id: i64, name: impl Into<String>, eviction_secs: i64) -> Self {
        Self {
            id,
            name: name.into(),
            eviction_secs,
            keep_days: 0,
        }
    }

    pub fn with_keep_days(mut self, keep_days: i32) -> Self {
        self.keep_days = keep_days;
        self
    }

    /// Eviction threshold for an entry held over the given carrier.
    pub fn eviction_threshold(&self, carrier: Carrier, basic_multiplier: i64) -> i64 {
        match carrier {
            Carrier::Basic => self.eviction_secs.saturating_mul(basic_multiplier.max(1)),
            Carrier::Poll | Carrier::Push => self.eviction_secs,
        }
    }
}
