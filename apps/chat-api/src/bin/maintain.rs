//! One-shot maintenance sweep for chat-api.
//!
//! Evicts silent participants and purges history past each room's retention
//! window, then exits. Meant for cron-style scheduling next to a server that
//! runs with `CHAT_MAINTENANCE_INTERVAL_SECS=0`.
//!
//! Usage:
//!   cargo run -p chat-api --bin chat-maintain

use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_api::config::Config;
use chat_api::db::PgStore;
use chat_api::engine::{ChatEngine, Maintenance};

#[tokio::main]
async fn main() {
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let database_url = config
        .database_url
        .clone()
        .expect("DATABASE_URL env var is required");

    let pool = chat_api::db::pool::connect(&database_url, 2).await;
    let engine = ChatEngine::builder(Arc::new(PgStore::new(pool)))
        .config(config.engine.clone())
        .build();

    let report = Maintenance::new(engine).sweep_once().await;
    println!(
        "Swept {} room(s): {} evicted, {} purged, {} failure(s).",
        report.rooms, report.evicted, report.purged, report.failures
    );

    if report.failures > 0 {
        std::process::exit(1);
    }
}
