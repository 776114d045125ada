#![allow(dead_code)]

use std::sync::Arc;

use axum::http::{HeaderName, StatusCode};
use axum::Router;
use axum_test::TestServer;

use chat_api::auth::authorizer::{Authorizer, OpenAuthorizer};
use chat_api::auth::middleware::HOST_USER_HEADER;
use chat_api::config::Config;
use chat_api::db::MemoryStore;
use chat_api::engine::ChatEngine;
use chat_api::gateway::fanout::GatewayBroadcast;
use chat_api::host::{ManualClock, MemoryUserDirectory};
use chat_api::models::room::Room;
use chat_api::AppState;

pub const ROOM_ID: i64 = 1;
pub const EVICTION_SECS: i64 = 1_800;
/// Clock value every test app starts at.
pub const START: i64 = 1_700_000_000;

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
}

/// Build an app over a fresh memory store where everyone may enter.
pub async fn test_app() -> TestApp {
    test_app_with(Arc::new(OpenAuthorizer)).await
}

pub async fn test_app_with(authorizer: Arc<dyn Authorizer>) -> TestApp {
    let clock = Arc::new(ManualClock::new(START));

    let users = Arc::new(MemoryUserDirectory::new());
    users.insert(1, "Ada Lovelace", None);
    users.insert(2, "Grace Hopper", Some("https://img.example/grace.png".to_string()));

    // Keep the gateway from syncing on its own during a test.
    let config = Config {
        push_interval_ms: 60_000,
        gateway_heartbeat_ms: 60_000,
        maintenance_interval_secs: 0,
        ..Config::default()
    };

    let engine = ChatEngine::builder(Arc::new(MemoryStore::new()))
        .clock(clock.clone())
        .users(users)
        .config(config.engine.clone())
        .build();
    engine
        .register_room(&Room::new(ROOM_ID, "lobby", EVICTION_SECS))
        .await
        .expect("register room");

    let state = AppState {
        engine,
        authorizer,
        config: Arc::new(config),
        broadcast: Arc::new(GatewayBroadcast::new()),
    };
    let app = chat_api::routes::router().with_state(state.clone());

    TestApp { app, state, clock }
}

pub fn host_user() -> HeaderName {
    HeaderName::from_static(HOST_USER_HEADER)
}

/// Log a user into the test room and return the session token.
pub async fn login(server: &TestServer, user_id: i64) -> String {
    let resp = server
        .post(&format!("/api/v1/rooms/{ROOM_ID}/login"))
        .add_header(host_user(), user_id.to_string())
        .json(&serde_json::json!({}))
        .await;
    resp.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = resp.json();
    body["session_token"].as_str().unwrap().to_string()
}

/// Post a message with the given cursor and return the sync response body.
pub async fn post(server: &TestServer, token: &str, text: &str, cursor: i64) -> serde_json::Value {
    let resp = server
        .post("/api/v1/sync")
        .json(&serde_json::json!({
            "session_token": token,
            "message": text,
            "cursor": cursor,
        }))
        .await;
    resp.assert_status_ok();
    resp.json()
}

/// Poll without posting.
pub async fn poll(server: &TestServer, token: &str, cursor: i64) -> serde_json::Value {
    let resp = server
        .post("/api/v1/sync")
        .json(&serde_json::json!({ "session_token": token, "cursor": cursor }))
        .await;
    resp.assert_status_ok();
    resp.json()
}
