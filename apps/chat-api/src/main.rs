use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_api::auth::authorizer::OpenAuthorizer;
use chat_api::config::Config;
use chat_api::db::{ChatStore, MemoryStore, PgStore};
use chat_api::engine::{ChatEngine, Maintenance};
use chat_api::gateway::fanout::GatewayBroadcast;
use chat_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing, env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let store: Arc<dyn ChatStore> = match &config.database_url {
        Some(url) => {
            let pool = chat_api::db::pool::connect(url, config.db_pool_size).await;
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, chat state is kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let engine = ChatEngine::builder(store)
        .config(config.engine.clone())
        .build();

    for room in &config.rooms {
        engine
            .register_room(room)
            .await
            .expect("failed to register configured room");
    }

    if config.maintenance_interval_secs > 0 {
        Maintenance::new(engine.clone())
            .spawn(Duration::from_secs(config.maintenance_interval_secs));
    }

    tracing::info!(
        rooms = config.rooms.len(),
        eviction_notice = ?config.engine.eviction_notice,
        "chat-api configured"
    );

    let state = AppState {
        engine,
        authorizer: Arc::new(OpenAuthorizer),
        config: Arc::new(config),
        broadcast: Arc::new(GatewayBroadcast::new()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(chat_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "chat-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
