pub mod docs;
pub mod health;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::experiences::{handlers as exp, search};
use crate::middleware::{auth, rate_limit, rate_limit::RateLimiter};
use crate::state::AppState;

pub fn build_router(state: AppState, limiter: Arc<RateLimiter>) -> Router {
    let api_key = state.config.api_key.clone();

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/docs", get(docs::docs_handler))
        .route("/openapi.json", get(docs::openapi_handler))
        // ── Experiences ────────────────────────────────────────────────────
        // Note: /search registered before the :id param route (Axum priority)
        .route("/v1/experiences/search", get(search::handle_search))
        .route(
            "/v1/experiences",
            post(exp::handle_create).get(exp::handle_list),
        )
        .route(
            "/v1/experiences/:id",
            get(exp::handle_get)
                .patch(exp::handle_update)
                .delete(exp::handle_delete),
        )
        .layer(middleware::from_fn_with_state(api_key, auth::require_api_key))
        .layer(middleware::from_fn_with_state(limiter, rate_limit::enforce))
        .with_state(state)
}
