//! Room access checks delegated to the host.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::engine::ChatError;

/// Decides whether a user may use a room and which group they act in.
///
/// `requested_group` is the group the client asked for; 0 asks the host to
/// pick. The returned group is the one the engine scopes visibility to.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, room_id: i64, user_id: i64, requested_group: i64) -> Result<i64, ChatError>;
}

/// Lets everyone in, in whichever group they ask for.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAuthorizer;

#[async_trait]
impl Authorizer for OpenAuthorizer {
    async fn authorize(&self, _room_id: i64, _user_id: i64, requested_group: i64) -> Result<i64, ChatError> {
        Ok(requested_group)
    }
}

/// Explicit per-room grants. A user without a grant is denied. A grant with
/// no groups means the user is ungrouped and sees the whole room.
#[derive(Default)]
pub struct GrantAuthorizer {
    grants: DashMap<(i64, i64), Vec<i64>>,
}

impl GrantAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, room_id: i64, user_id: i64, groups: Vec<i64>) {
        self.grants.insert((room_id, user_id), groups);
    }

    pub fn revoke(&self, room_id: i64, user_id: i64) {
        self.grants.remove(&(room_id, user_id));
    }
}

#[async_trait]
impl Authorizer for GrantAuthorizer {
    async fn authorize(&self, room_id: i64, user_id: i64, requested_group: i64) -> Result<i64, ChatError> {
        let groups = self
            .grants
            .get(&(room_id, user_id))
            .map(|g| g.clone())
            .ok_or_else(|| ChatError::PermissionDenied(format!("no access to room {room_id}")))?;

        if requested_group == 0 {
            return Ok(groups.first().copied().unwrap_or(0));
        }
        if groups.contains(&requested_group) {
            Ok(requested_group)
        } else {
            Err(ChatError::PermissionDenied(format!(
                "not a member of group {requested_group}"
            )))
        }
    }
}
