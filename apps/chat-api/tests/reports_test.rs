mod common;

use axum::http::StatusCode;
use axum_test::TestServer;

use common::{host_user, login, post, ROOM_ID, START};

/// Two bursts of chat an hour apart; the second is still going at `START + 4200`.
async fn seed(t: &common::TestApp, server: &TestServer) {
    let ada = login(server, 1).await;
    t.clock.set(START + 10);
    post(server, &ada, "a", START + 10).await;

    t.clock.set(START + 4_000);
    post(server, &ada, "b", START + 4_000).await;
    t.clock.set(START + 4_100);
    post(server, &ada, "c", START + 4_100).await;

    t.clock.set(START + 4_200);
}

// ---------------------------------------------------------------------------
// GET /api/v1/rooms/{room_id}/sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_sessions_are_listed() {
    let t = common::test_app().await;
    let server = TestServer::new(t.app.clone()).unwrap();
    seed(&t, &server).await;

    let resp = server
        .get(&format!("/api/v1/rooms/{ROOM_ID}/sessions"))
        .add_header(host_user(), "1".to_string())
        .await;

    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["start"], START);
    assert_eq!(data[0]["end"], START + 10);
    assert_eq!(data[0]["is_complete"], true);
    // The join event bounds the session but is not counted.
    assert_eq!(data[0]["users"][0]["user_id"], 1);
    assert_eq!(data[0]["users"][0]["message_count"], 1);
}

#[tokio::test]
async fn show_all_includes_the_running_session() {
    let t = common::test_app().await;
    let server = TestServer::new(t.app.clone()).unwrap();
    seed(&t, &server).await;

    let resp = server
        .get(&format!("/api/v1/rooms/{ROOM_ID}/sessions?show_all=true"))
        .add_header(host_user(), "1".to_string())
        .await;

    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[1]["start"], START + 4_000);
    assert_eq!(data[1]["end"], START + 4_100);
    assert_eq!(data[1]["is_complete"], false);
    assert_eq!(data[1]["users"][0]["message_count"], 2);
}

#[tokio::test]
async fn sessions_of_unknown_room_are_not_found() {
    let t = common::test_app().await;
    let server = TestServer::new(t.app).unwrap();

    let resp = server
        .get("/api/v1/rooms/99/sessions")
        .add_header(host_user(), "1".to_string())
        .await;

    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sessions_require_host_identity() {
    let t = common::test_app().await;
    let server = TestServer::new(t.app).unwrap();

    let resp = server.get(&format!("/api/v1/rooms/{ROOM_ID}/sessions")).await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

// ---------------------------------------------------------------------------
// GET /api/v1/rooms/{room_id}/sessions/messages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn session_messages_are_rendered_for_the_requester() {
    let t = common::test_app().await;
    let server = TestServer::new(t.app.clone()).unwrap();
    seed(&t, &server).await;

    let resp = server
        .get(&format!(
            "/api/v1/rooms/{ROOM_ID}/sessions/messages?start={}&end={}",
            START,
            START + 10
        ))
        .add_header(host_user(), "1".to_string())
        .await;

    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["kind"], "system");
    assert_eq!(data[0]["text"], "enter");
    assert_eq!(data[1]["text"], "a");
    assert_eq!(data[1]["mine"], true);
    assert_eq!(data[1]["author"]["display_name"], "Ada Lovelace");
}

#[tokio::test]
async fn inverted_range_is_rejected() {
    let t = common::test_app().await;
    let server = TestServer::new(t.app).unwrap();

    let resp = server
        .get(&format!(
            "/api/v1/rooms/{ROOM_ID}/sessions/messages?start={}&end={}",
            START + 10,
            START
        ))
        .add_header(host_user(), "1".to_string())
        .await;

    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}
