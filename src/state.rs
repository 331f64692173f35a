use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::embedding;
use crate::webhook::Dispatcher;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub dispatcher: Arc<Dispatcher>,
    /// Present iff embedding is configured; also gates semantic search.
    pub embedding: Option<Arc<embedding::Service>>,
}
