use crate::db::store::StoreError;

/// Errors surfaced by the chat engine to its carriers.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The session token does not resolve to a presence entry.
    #[error("not logged in")]
    NotLoggedIn,
    /// The session vanished during the request (evicted or logged out).
    #[error("unknown or expired chat session")]
    UnknownSession,
    #[error("storage unavailable: {0}")]
    Storage(String),
    #[error("could not allocate a session token")]
    Allocation,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("room {0} not found")]
    RoomNotFound(i64),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ChatError {
    /// Whether the client must log in again before retrying.
    pub fn requires_login(&self) -> bool {
        matches!(self, ChatError::NotLoggedIn | ChatError::UnknownSession)
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MissingRoom(room_id) => ChatError::RoomNotFound(room_id),
            other => ChatError::Storage(other.to_string()),
        }
    }
}
