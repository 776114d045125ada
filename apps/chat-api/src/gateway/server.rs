//! WebSocket upgrade handler and per-connection event loop.
//!
//! A connection carries one chat session obtained from the login route. It
//! syncs on IDENTIFY, whenever the room sees activity, on every push tick and
//! on every SEND. Results go out as SYNC dispatches.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time;

use crate::engine::{ChatError, SyncRequest};
use crate::error::ApiError;
use crate::models::message::BeepTarget;
use crate::AppState;

use super::events::{
    ClientMessage, EventName, GatewayMessage, HeartbeatPayload, IdentifyPayload, SendPayload,
    OP_HEARTBEAT, OP_IDENTIFY, OP_SEND,
};
use super::fanout::RoomActivity;
use super::session::GatewaySession;

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
const CLOSE_AUTH_FAILED: u16 = 4004;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

/// Timeout for receiving IDENTIFY after connection (seconds).
const IDENTIFY_TIMEOUT_SECS: u64 = 10;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Whether the event loop keeps going after a step.
enum Flow {
    Continue,
    Close,
}

#[derive(Serialize)]
struct ReadyPayload<'a> {
    connection_id: &'a str,
    room_id: i64,
    user_id: i64,
    heartbeat_interval: u64,
    push_interval: u64,
}

#[derive(Serialize)]
struct ErrorPayload {
    code: String,
    message: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Step 1: Wait for IDENTIFY within timeout.
    let identify = time::timeout(Duration::from_secs(IDENTIFY_TIMEOUT_SECS), async {
        while let Some(msg) = ws_rx.next().await {
            let text = match msg {
                Ok(Message::Text(t)) => t,
                Ok(Message::Close(_)) => return Err((CLOSE_UNKNOWN_ERROR, "client closed")),
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(?e, "ws read error during identify");
                    return Err((CLOSE_UNKNOWN_ERROR, "read error"));
                }
            };

            let client_msg: ClientMessage = serde_json::from_str(&text)
                .map_err(|_| (CLOSE_UNKNOWN_ERROR, "Invalid JSON"))?;

            if client_msg.op != OP_IDENTIFY {
                return Err((CLOSE_NOT_AUTHENTICATED, "Expected IDENTIFY"));
            }
            return serde_json::from_value::<IdentifyPayload>(client_msg.d)
                .map_err(|_| (CLOSE_AUTH_FAILED, "Invalid identify payload"));
        }
        Err((CLOSE_UNKNOWN_ERROR, "connection closed before identify"))
    })
    .await;

    let payload = match identify {
        Ok(Ok(payload)) => payload,
        Ok(Err((code, reason))) => {
            tracing::debug!(%reason, "gateway handshake failed");
            let _ = send_close(&mut ws_tx, code, reason).await;
            return;
        }
        Err(_timeout) => {
            let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Handshake timeout").await;
            return;
        }
    };

    // Step 2: Attach to the chat session.
    let entry = match state.engine.presence().resolve(&payload.session_token).await {
        Ok(entry) => entry,
        Err(err) => {
            tracing::debug!(%err, "gateway identify rejected");
            let _ = fail(&mut ws_tx, None, err).await;
            return;
        }
    };
    let mut session = GatewaySession::new(&entry, payload.cursor, payload.row_parity);

    tracing::info!(
        connection_id = %session.connection_id,
        room_id = session.room_id,
        user_id = session.user_id,
        "gateway session established"
    );

    let seq = session.next_seq();
    let ready = ReadyPayload {
        connection_id: &session.connection_id,
        room_id: session.room_id,
        user_id: session.user_id,
        heartbeat_interval: state.config.gateway_heartbeat_ms,
        push_interval: state.config.push_interval_ms,
    };
    let ready_msg = GatewayMessage::dispatch(EventName::READY, seq, to_value(&ready));
    if !send_message(&mut ws_tx, &ready_msg).await {
        return;
    }

    // Subscribe before the first sync so no activity slips between the two.
    let activity_rx = state.broadcast.subscribe();

    let first = session.poll();
    if let Flow::Close = sync_and_dispatch(&state, &mut session, &mut ws_tx, first, true).await {
        return;
    }

    run_session(&state, &mut session, ws_tx, ws_rx, activity_rx).await;

    tracing::info!(
        connection_id = %session.connection_id,
        room_id = session.room_id,
        user_id = session.user_id,
        "gateway session ended"
    );
}

/// Main session event loop: read client ops, sync on room activity and push
/// ticks, enforce heartbeat.
async fn run_session(
    state: &AppState,
    session: &mut GatewaySession,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    mut activity_rx: broadcast::Receiver<RoomActivity>,
) {
    // Heartbeat deadline: client must heartbeat within 1.5× the interval.
    let heartbeat_deadline = Duration::from_millis(state.config.gateway_heartbeat_ms.max(1) * 3 / 2);
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    let mut push_timer = time::interval(Duration::from_millis(state.config.push_interval_ms.max(1)));
    push_timer.tick().await;

    loop {
        let flow = tokio::select! {
            // Client sends us a message.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                                break;
                            }
                        };

                        match client_msg.op {
                            OP_HEARTBEAT => {
                                got_heartbeat = true;
                                handle_heartbeat(state, session, &mut ws_tx, client_msg.d).await
                            }
                            OP_SEND => handle_send(state, session, &mut ws_tx, client_msg.d).await,
                            OP_IDENTIFY => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Already identified").await;
                                Flow::Close
                            }
                            _ => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
                                Flow::Close
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => Flow::Close,
                    Some(Ok(_)) => Flow::Continue,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.connection_id, "ws read error");
                        Flow::Close
                    }
                }
            }

            // Something happened in some room.
            result = activity_rx.recv() => {
                match result {
                    Ok(activity) if activity.room_id != session.room_id => Flow::Continue,
                    Ok(_) => {
                        let poll = session.poll();
                        sync_and_dispatch(state, session, &mut ws_tx, poll, false).await
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            connection_id = %session.connection_id,
                            skipped = n,
                            "gateway session lagged behind broadcast"
                        );
                        // A missed wake-up may have been ours.
                        let poll = session.poll();
                        sync_and_dispatch(state, session, &mut ws_tx, poll, false).await
                    }
                    Err(broadcast::error::RecvError::Closed) => Flow::Close,
                }
            }

            // Periodic sync, also keeps presence alive and runs eviction.
            _ = push_timer.tick() => {
                let poll = session.poll();
                sync_and_dispatch(state, session, &mut ws_tx, poll, false).await
            }

            // Heartbeat timeout check.
            _ = heartbeat_timer.tick() => {
                if got_heartbeat {
                    got_heartbeat = false;
                    Flow::Continue
                } else {
                    tracing::debug!(
                        connection_id = %session.connection_id,
                        "heartbeat timeout, closing connection"
                    );
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    Flow::Close
                }
            }
        };

        if let Flow::Close = flow {
            break;
        }
    }
}

async fn handle_heartbeat(
    state: &AppState,
    session: &mut GatewaySession,
    ws_tx: &mut WsSink,
    data: serde_json::Value,
) -> Flow {
    if let Err(err) = state.engine.presence().heartbeat(&session.session_token).await {
        return fail(ws_tx, Some(session), err).await;
    }
    let payload: HeartbeatPayload =
        serde_json::from_value(data).unwrap_or(HeartbeatPayload { seq: 0 });
    if send_message(ws_tx, &GatewayMessage::heartbeat_ack(payload.seq)).await {
        Flow::Continue
    } else {
        Flow::Close
    }
}

async fn handle_send(
    state: &AppState,
    session: &mut GatewaySession,
    ws_tx: &mut WsSink,
    data: serde_json::Value,
) -> Flow {
    let payload: SendPayload = match serde_json::from_value(data) {
        Ok(p) => p,
        Err(_) => return send_error(ws_tx, session, ApiError::bad_request("Invalid send payload")).await,
    };
    let beep = match payload.beep.as_deref().map(str::parse::<BeepTarget>).transpose() {
        Ok(beep) => beep,
        Err(_) => return send_error(ws_tx, session, ApiError::bad_request("Invalid beep target")).await,
    };

    let request = SyncRequest {
        message: payload.message,
        beep,
        idempotency_key: payload.idempotency_key,
        ..session.poll()
    };
    sync_and_dispatch(state, session, ws_tx, request, true).await
}

/// Run one sync for the connection and dispatch the result. Idle results are
/// only sent when `always` is set.
async fn sync_and_dispatch(
    state: &AppState,
    session: &mut GatewaySession,
    ws_tx: &mut WsSink,
    request: SyncRequest,
    always: bool,
) -> Flow {
    let result = match state.engine.sync(request).await {
        Ok(result) => result,
        Err(err) => return fail(ws_tx, Some(session), err).await,
    };

    session.advance(&result);
    if result.sent.is_some() {
        state.broadcast.notify(session.room_id);
    }
    if !always && result.is_idle() {
        return Flow::Continue;
    }

    let seq = session.next_seq();
    let msg = GatewayMessage::dispatch(EventName::SYNC, seq, to_value(&result));
    if send_message(ws_tx, &msg).await {
        Flow::Continue
    } else {
        Flow::Close
    }
}

/// Report an engine error. Session errors end the connection with RECONNECT;
/// anything else is dispatched as an ERROR event.
async fn fail(ws_tx: &mut WsSink, session: Option<&mut GatewaySession>, err: ChatError) -> Flow {
    if err.requires_login() {
        let _ = send_message(ws_tx, &GatewayMessage::reconnect(&err.to_string())).await;
        let _ = send_close(ws_tx, CLOSE_AUTH_FAILED, "Chat session expired").await;
        return Flow::Close;
    }

    match session {
        Some(session) => send_error(ws_tx, session, ApiError::from(err)).await,
        None => {
            let _ = send_close(ws_tx, CLOSE_UNKNOWN_ERROR, "Chat unavailable").await;
            Flow::Close
        }
    }
}

async fn send_error(ws_tx: &mut WsSink, session: &mut GatewaySession, err: ApiError) -> Flow {
    let payload = ErrorPayload {
        code: err.code,
        message: err.message,
    };
    let seq = session.next_seq();
    let msg = GatewayMessage::dispatch(EventName::ERROR, seq, to_value(&payload));
    if send_message(ws_tx, &msg).await {
        Flow::Continue
    } else {
        Flow::Close
    }
}

fn to_value<T: Serialize>(data: &T) -> serde_json::Value {
    serde_json::to_value(data).unwrap_or_else(|err| {
        tracing::error!(%err, "failed to serialize gateway payload");
        serde_json::Value::Null
    })
}

/// Serialize and send. Returns false once the socket is gone.
async fn send_message(ws_tx: &mut WsSink, msg: &GatewayMessage) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(err) => {
            tracing::error!(%err, "failed to serialize gateway message");
            return true;
        }
    };
    ws_tx.send(Message::Text(json.into())).await.is_ok()
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
