//! Polling carrier: login, sync, heartbeat, logout and the roster.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::HostUser;
use crate::engine::{RosterEntry, SyncRequest, SyncResult};
use crate::error::{ApiError, ApiErrorBody};
use crate::models::message::BeepTarget;
use crate::models::presence::Carrier;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms/{room_id}/login", post(login))
        .route("/sync", post(sync))
        .route("/heartbeat", post(heartbeat))
        .route("/logout", post(logout))
        .route("/presence", get(presence))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Group to act in. 0 lets the host decide.
    #[serde(default)]
    pub group_id: i64,
    #[serde(default)]
    pub carrier: Carrier,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub session_token: String,
    pub room_id: i64,
    /// Group the session was admitted to.
    pub group_id: i64,
    /// Suggested seconds between syncs.
    pub refresh_room_secs: u64,
    /// Suggested seconds between roster refreshes.
    pub refresh_userlist_secs: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SyncBody {
    pub session_token: String,
    #[serde(default)]
    pub message: Option<String>,
    /// A user id or `all`.
    #[serde(default)]
    pub beep: Option<String>,
    #[serde(default)]
    pub cursor: i64,
    #[serde(default)]
    pub row_parity: u8,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SessionBody {
    pub session_token: String,
}

#[derive(Debug, Deserialize)]
pub struct PresenceQuery {
    pub session_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PresenceResponse {
    pub users: Vec<RosterEntry>,
}

// ---------------------------------------------------------------------------
// POST /api/v1/rooms/{room_id}/login
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/rooms/{room_id}/login",
    tag = "Chat",
    security(("host_user" = [])),
    params(("room_id" = i64, Path, description = "Room ID")),
    request_body = LoginRequest,
    responses(
        (status = 201, description = "Logged in", body = LoginResponse),
        (status = 401, description = "No host identity", body = ApiErrorBody),
        (status = 403, description = "Not allowed in this room or group", body = ApiErrorBody),
        (status = 404, description = "Room not found", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody),
    ),
)]
pub async fn login(
    HostUser { user_id }: HostUser,
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Json(body): Json<LoginRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), ApiError> {
    let room = state.engine.room(room_id).await?;
    let group_id = state.authorizer.authorize(room.id, user_id, body.group_id).await?;

    let entry = state
        .engine
        .presence()
        .login(room.id, user_id, group_id, body.carrier)
        .await?;
    state.broadcast.notify(room.id);

    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            session_token: entry.token,
            room_id: room.id,
            group_id,
            refresh_room_secs: state.config.refresh_room_secs,
            refresh_userlist_secs: state.config.refresh_userlist_secs,
        }),
    ))
}

// ---------------------------------------------------------------------------
// POST /api/v1/sync
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/sync",
    tag = "Chat",
    request_body = SyncBody,
    responses(
        (status = 200, description = "Delta since the cursor", body = SyncResult),
        (status = 400, description = "Invalid message or beep", body = ApiErrorBody),
        (status = 401, description = "Session unknown, log in again", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable, try again", body = ApiErrorBody),
    ),
)]
pub async fn sync(
    State(state): State<AppState>,
    Json(body): Json<SyncBody>,
) -> Result<Json<SyncResult>, ApiError> {
    let beep = body
        .beep
        .as_deref()
        .map(str::parse::<BeepTarget>)
        .transpose()
        .map_err(ApiError::bad_request)?;

    let result = state
        .engine
        .sync(SyncRequest {
            session_token: body.session_token,
            message: body.message,
            beep,
            cursor: body.cursor,
            row_parity: body.row_parity,
            idempotency_key: body.idempotency_key,
        })
        .await?;

    if result.sent.is_some() {
        state.broadcast.notify(result.room_id);
    }

    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// POST /api/v1/heartbeat
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/heartbeat",
    tag = "Chat",
    request_body = SessionBody,
    responses(
        (status = 204, description = "Presence refreshed"),
        (status = 401, description = "Session unknown, log in again", body = ApiErrorBody),
    ),
)]
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(body): Json<SessionBody>,
) -> Result<StatusCode, ApiError> {
    state.engine.presence().heartbeat(&body.session_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// POST /api/v1/logout
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/logout",
    tag = "Chat",
    request_body = SessionBody,
    responses(
        (status = 204, description = "Logged out"),
        (status = 401, description = "Session unknown", body = ApiErrorBody),
    ),
)]
pub async fn logout(
    State(state): State<AppState>,
    Json(body): Json<SessionBody>,
) -> Result<StatusCode, ApiError> {
    let entry = state.engine.presence().logout(&body.session_token).await?;
    state.broadcast.notify(entry.room_id);
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// GET /api/v1/presence
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/presence",
    tag = "Chat",
    params(("session_token" = String, Query, description = "Chat session token")),
    responses(
        (status = 200, description = "Users in the room, longest present first", body = PresenceResponse),
        (status = 401, description = "Not logged in", body = ApiErrorBody),
    ),
)]
pub async fn presence(
    State(state): State<AppState>,
    Query(query): Query<PresenceQuery>,
) -> Result<Json<PresenceResponse>, ApiError> {
    let users = state.engine.roster(&query.session_token).await?;
    Ok(Json(PresenceResponse { users }))
}
