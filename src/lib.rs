// Library exports for binary tools and tests
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use sqlx::PgPool;

use config::Config;
use services::{cache::CacheStore, generation::GenerationOrchestrator};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub cache: Arc<dyn CacheStore>,
    pub config: Arc<Config>,
    pub orchestrator: Arc<GenerationOrchestrator>,
}
