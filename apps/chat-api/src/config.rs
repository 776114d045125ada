use std::str::FromStr;

use crate::models::room::Room;

/// Whether evicting a silent participant also posts an `exit` event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionNotice {
    /// Evicted users just disappear from the roster.
    #[default]
    Silent,
    /// Every eviction appends an `exit` system message.
    Announce,
}

impl FromStr for EvictionNotice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" => Ok(EvictionNotice::Silent),
            "announce" => Ok(EvictionNotice::Announce),
            other => Err(format!("unknown eviction notice policy: {other}")),
        }
    }
}

/// Tunables of the chat engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Largest silence between two messages of the same reporting session.
    pub session_gap_secs: i64,
    /// Longest accepted message body, in characters.
    pub max_message_len: usize,
    pub eviction_notice: EvictionNotice,
    /// Eviction threshold factor for the static-refresh carrier.
    pub basic_eviction_multiplier: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_gap_secs: 5 * 60,
            max_message_len: 4000,
            eviction_notice: EvictionNotice::Silent,
            basic_eviction_multiplier: 10,
        }
    }
}

/// Chat API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string. Without it state is kept in memory.
    pub database_url: Option<String>,
    pub db_pool_size: usize,
    /// Port the HTTP server binds to.
    pub port: u16,
    pub engine: EngineConfig,
    /// Eviction threshold for rooms seeded without one.
    pub default_eviction_secs: i64,
    /// Rooms registered at startup, from `CHAT_ROOMS`.
    pub rooms: Vec<Room>,
    /// Suggested poll interval handed to clients.
    pub refresh_room_secs: u64,
    /// Suggested roster refresh interval handed to clients.
    pub refresh_userlist_secs: u64,
    /// How often a gateway connection syncs on its own.
    pub push_interval_ms: u64,
    /// Client heartbeat interval on the gateway.
    pub gateway_heartbeat_ms: u64,
    /// Period of the background sweep. 0 disables it.
    pub maintenance_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a variable is present but
    /// malformed.
    pub fn from_env() -> Self {
        let default_eviction_secs = parsed_var("CHAT_DEFAULT_EVICTION_SECS", 35);
        let engine_defaults = EngineConfig::default();

        let eviction_notice = match optional_var("CHAT_EVICTION_NOTICE") {
            Some(v) => v.parse().unwrap_or_else(|e| panic!("CHAT_EVICTION_NOTICE: {e}")),
            None => engine_defaults.eviction_notice,
        };

        let rooms = match optional_var("CHAT_ROOMS") {
            Some(v) => parse_rooms(&v, default_eviction_secs)
                .unwrap_or_else(|e| panic!("CHAT_ROOMS: {e}")),
            None => Vec::new(),
        };

        Self {
            database_url: optional_var("DATABASE_URL"),
            db_pool_size: parsed_var("DATABASE_POOL_SIZE", 20),
            port: parsed_var("PORT", 4003),
            engine: EngineConfig {
                session_gap_secs: parsed_var("CHAT_SESSION_GAP_SECS", engine_defaults.session_gap_secs),
                max_message_len: parsed_var("CHAT_MAX_MESSAGE_LEN", engine_defaults.max_message_len),
                eviction_notice,
                basic_eviction_multiplier: parsed_var(
                    "CHAT_BASIC_EVICTION_MULTIPLIER",
                    engine_defaults.basic_eviction_multiplier,
                ),
            },
            default_eviction_secs,
            rooms,
            refresh_room_secs: parsed_var("CHAT_REFRESH_ROOM_SECS", 5),
            refresh_userlist_secs: parsed_var("CHAT_REFRESH_USERLIST_SECS", 10),
            push_interval_ms: parsed_var("CHAT_PUSH_INTERVAL_MS", 5_000),
            gateway_heartbeat_ms: parsed_var("CHAT_GATEWAY_HEARTBEAT_MS", 30_000),
            maintenance_interval_secs: parsed_var("CHAT_MAINTENANCE_INTERVAL_SECS", 60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            db_pool_size: 20,
            port: 4003,
            engine: EngineConfig::default(),
            default_eviction_secs: 35,
            rooms: Vec::new(),
            refresh_room_secs: 5,
            refresh_userlist_secs: 10,
            push_interval_ms: 5_000,
            gateway_heartbeat_ms: 30_000,
            maintenance_interval_secs: 60,
        }
    }
}

/// Parse a room list of the form `id:name[:eviction_secs[:keep_days]]`,
/// comma separated.
pub fn parse_rooms(raw: &str, default_eviction_secs: i64) -> Result<Vec<Room>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let mut parts = entry.split(':');
            let id = parts
                .next()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|id| *id > 0)
                .ok_or_else(|| format!("invalid room id in `{entry}`"))?;
            let name = parts
                .next()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| format!("missing room name in `{entry}`"))?;
            let eviction_secs = match parts.next() {
                Some(v) => v
                    .trim()
                    .parse::<i64>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| format!("invalid eviction seconds in `{entry}`"))?,
                None => default_eviction_secs,
            };
            let keep_days = match parts.next() {
                Some(v) => v
                    .trim()
                    .parse::<i32>()
                    .ok()
                    .filter(|d| *d >= 0)
                    .ok_or_else(|| format!("invalid keep days in `{entry}`"))?,
                None => 0,
            };
            if parts.next().is_some() {
                return Err(format!("too many fields in `{entry}`"));
            }
            Ok(Room::new(id, name, eviction_secs).with_keep_days(keep_days))
        })
        .collect()
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
