use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use utoipa::ToSchema;

/// How a user is shown next to their messages and in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct UserDisplay {
    pub user_id: i64,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl UserDisplay {
    /// Shown for users the directory does not know about.
    pub fn fallback(user_id: i64) -> Self {
        Self {
            user_id,
            display_name: format!("User {user_id}"),
            avatar_url: None,
        }
    }
}

/// Resolves user ids to display data. Lookups never fail; unknown users get
/// [`UserDisplay::fallback`].
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn display(&self, user_id: i64) -> UserDisplay;
}

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: DashMap<i64, UserDisplay>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: i64, display_name: impl Into<String>, avatar_url: Option<String>) {
        self.users.insert(
            user_id,
            UserDisplay {
                user_id,
                display_name: display_name.into(),
                avatar_url,
            },
        );
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn display(&self, user_id: i64) -> UserDisplay {
        self.users
            .get(&user_id)
            .map(|u| u.clone())
            .unwrap_or_else(|| UserDisplay::fallback(user_id))
    }
}
