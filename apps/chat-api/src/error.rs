use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::engine::ChatError;

/// Structured API error returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<Vec<FieldError>>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND".to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: "FORBIDDEN".to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn validation(details: Vec<FieldError>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR".to_string(),
            message: "Validation failed".to_string(),
            details: Some(details),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::NotLoggedIn => Self::new(
                StatusCode::UNAUTHORIZED,
                "NOT_LOGGED_IN",
                "Not logged in to this chat room",
            ),
            ChatError::UnknownSession => Self::new(
                StatusCode::UNAUTHORIZED,
                "UNKNOWN_SESSION",
                "Chat session expired, log in again",
            ),
            ChatError::Storage(detail) => {
                tracing::error!(%detail, "chat storage error");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORAGE_ERROR",
                    "Chat storage is unavailable, try again",
                )
            }
            ChatError::Allocation => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ALLOCATION_ERROR",
                "Could not start a chat session",
            ),
            ChatError::PermissionDenied(reason) => Self::forbidden(reason),
            ChatError::RoomNotFound(room_id) => Self::not_found(format!("Room {room_id} not found")),
            ChatError::InvalidMessage(reason) => Self::validation(vec![FieldError {
                field: "message".to_string(),
                message: reason,
            }]),
        }
    }
}
