//! Session reports over a room's history.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::HostUser;
use crate::engine::{render, ChatSession, DeliveredMessage};
use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms/{room_id}/sessions", get(list_sessions))
        .route("/rooms/{room_id}/sessions/messages", get(session_messages))
}

#[derive(Debug, Deserialize)]
pub struct SessionsParams {
    #[serde(default)]
    pub group_id: i64,
    #[serde(default)]
    pub show_all: bool,
}

#[derive(Debug, Deserialize)]
pub struct SessionMessagesParams {
    pub start: i64,
    pub end: i64,
    #[serde(default)]
    pub group_id: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionsResponse {
    pub data: Vec<ChatSession>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionMessagesResponse {
    pub data: Vec<DeliveredMessage>,
}

// ---------------------------------------------------------------------------
// GET /api/v1/rooms/{room_id}/sessions
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/rooms/{room_id}/sessions",
    tag = "Reports",
    security(("host_user" = [])),
    params(
        ("room_id" = i64, Path, description = "Room ID"),
        ("group_id" = Option<i64>, Query, description = "Group to report on, 0 for all"),
        ("show_all" = Option<bool>, Query, description = "Include the session still in progress"),
    ),
    responses(
        (status = 200, description = "Sessions, oldest first", body = SessionsResponse),
        (status = 401, description = "No host identity", body = ApiErrorBody),
        (status = 403, description = "Forbidden", body = ApiErrorBody),
        (status = 404, description = "Room not found", body = ApiErrorBody),
    ),
)]
pub async fn list_sessions(
    HostUser { user_id }: HostUser,
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Query(params): Query<SessionsParams>,
) -> Result<Json<SessionsResponse>, ApiError> {
    let group_id = state.authorizer.authorize(room_id, user_id, params.group_id).await?;
    let data = state.engine.sessions(room_id, group_id, params.show_all).await?;
    Ok(Json(SessionsResponse { data }))
}

// ---------------------------------------------------------------------------
// GET /api/v1/rooms/{room_id}/sessions/messages
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/rooms/{room_id}/sessions/messages",
    tag = "Reports",
    security(("host_user" = [])),
    params(
        ("room_id" = i64, Path, description = "Room ID"),
        ("start" = i64, Query, description = "Session start timestamp"),
        ("end" = i64, Query, description = "Session end timestamp"),
        ("group_id" = Option<i64>, Query, description = "Group to report on, 0 for all"),
    ),
    responses(
        (status = 200, description = "Messages of the session, oldest first", body = SessionMessagesResponse),
        (status = 400, description = "Invalid range", body = ApiErrorBody),
        (status = 401, description = "No host identity", body = ApiErrorBody),
        (status = 403, description = "Forbidden", body = ApiErrorBody),
        (status = 404, description = "Room not found", body = ApiErrorBody),
    ),
)]
pub async fn session_messages(
    HostUser { user_id }: HostUser,
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Query(params): Query<SessionMessagesParams>,
) -> Result<Json<SessionMessagesResponse>, ApiError> {
    if params.end != 0 && params.start > params.end {
        return Err(ApiError::bad_request("start must not be after end"));
    }

    let group_id = state.authorizer.authorize(room_id, user_id, params.group_id).await?;
    let messages = state
        .engine
        .session_messages(room_id, params.start, params.end, group_id)
        .await?;
    let data = render::deliver(messages, user_id, state.engine.users().as_ref()).await;
    Ok(Json(SessionMessagesResponse { data }))
}
