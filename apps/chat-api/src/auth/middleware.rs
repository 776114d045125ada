//! Host identity extraction.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Header the host's front proxy sets to the authenticated user id.
pub const HOST_USER_HEADER: &str = "x-chat-user";

/// Authenticated host user, taken from the `x-chat-user` header.
#[derive(Debug, Clone, Copy)]
pub struct HostUser {
    pub user_id: i64,
}

/// Rejection returned when the identity header is missing or malformed.
pub struct AuthError {
    message: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": self.message
            }
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for HostUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(HOST_USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError {
                message: "Missing x-chat-user header",
            })?;

        let user_id = header
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or(AuthError {
                message: "Invalid x-chat-user header",
            })?;

        Ok(HostUser { user_id })
    }
}
