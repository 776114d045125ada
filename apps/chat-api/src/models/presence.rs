use std::fmt;
use std::str::FromStr;

use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::schema::chat_presence;

/// How a client reaches the room. The carrier only affects the eviction
/// threshold; every carrier speaks the same sync protocol.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum Carrier {
    /// Browser polling over HTTP.
    #[default]
    Poll,
    /// Long-lived gateway connection.
    Push,
    /// Static page refresh without scripting. Polls rarely.
    Basic,
}

impl Carrier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Carrier::Poll => "poll",
            Carrier::Push => "push",
            Carrier::Basic => "basic",
        }
    }
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Carrier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "poll" => Ok(Carrier::Poll),
            "push" => Ok(Carrier::Push),
            "basic" => Ok(Carrier::Basic),
            other => Err(format!("unknown carrier: {other}")),
        }
    }
}

impl ToSql<Text, Pg> for Carrier {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
    }
}

impl FromSql<Text, Pg> for Carrier {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
        raw.parse().map_err(|e: String| e.into())
    }
}

/// One logged-in participant session in a room.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = chat_presence)]
pub struct PresenceEntry {
    pub token: String,
    pub room_id: i64,
    pub user_id: i64,
    pub group_id: i64,
    pub carrier: Carrier,
    pub first_seen: i64,
    pub last_heartbeat: i64,
    pub last_message_sent: i64,
}

impl PresenceEntry {
    /// Whether neither heartbeat nor chat activity happened at or after
    /// `cutoff`.
    pub fn is_stale(&self, cutoff: i64) -> bool {
        self.last_heartbeat < cutoff && self.last_message_sent < cutoff
    }
}
