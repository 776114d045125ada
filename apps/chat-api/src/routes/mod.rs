pub mod chat;
pub mod health;
pub mod reports;

use axum::Router;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::auth::middleware::HOST_USER_HEADER;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest("/api/v1", chat::router().merge(reports::router()))
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "host_user",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(HOST_USER_HEADER))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Chat
        chat::login,
        chat::sync,
        chat::heartbeat,
        chat::logout,
        chat::presence,
        // Reports
        reports::list_sessions,
        reports::session_messages,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Models
            crate::models::room::Room,
            crate::models::presence::Carrier,
            crate::host::UserDisplay,
            crate::engine::DeliveredMessage,
            crate::engine::MessageKind,
            crate::engine::render::BeepNotice,
            crate::engine::RosterEntry,
            crate::engine::SyncResult,
            crate::engine::ChatSession,
            crate::engine::SessionUser,
            // Route request/response types
            health::HealthResponse,
            chat::LoginRequest,
            chat::LoginResponse,
            chat::SyncBody,
            chat::SessionBody,
            chat::PresenceResponse,
            reports::SessionsResponse,
            reports::SessionMessagesResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Chat", description = "Room presence and message sync"),
        (name = "Reports", description = "Chat session reports"),
    )
)]
pub struct ApiDoc;
