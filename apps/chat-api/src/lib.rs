pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod host;
pub mod models;
pub mod routes;

use std::sync::Arc;

use auth::authorizer::Authorizer;
use config::Config;
use engine::ChatEngine;
use gateway::fanout::GatewayBroadcast;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: ChatEngine,
    pub authorizer: Arc<dyn Authorizer>,
    pub config: Arc<Config>,
    pub broadcast: Arc<GatewayBroadcast>,
}
