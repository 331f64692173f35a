mod config;
mod db;
mod embedding;
mod enrichment;
mod errors;
mod experiences;
mod middleware;
mod models;
mod provider;
mod queue;
mod routes;
mod state;
mod webhook;
mod worker;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::middleware::rate_limit::{spawn_sweeper, RateLimiter};
use crate::routes::build_router;
use crate::state::AppState;
use crate::webhook::Dispatcher;
use crate::worker::{WorkerContext, WorkerPool};

/// Request bodies are hard-capped before any further processing.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const WEBHOOK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (errors on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={},tower_http=info",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.log_level
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        environment = %config.environment,
        "Starting Pulse Hub v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Initialize PostgreSQL and apply migrations
    let pool = create_pool(&config).await?;
    sqlx::migrate!().run(&pool).await?;

    // Webhook dispatcher (fan-out worker pool starts immediately)
    let dispatcher = Arc::new(Dispatcher::with_pool(
        config.webhook_urls.clone(),
        config.webhook_workers,
        config.webhook_queue_size,
        Duration::from_secs(config.webhook_timeout_secs),
    ));
    if config.webhook_urls.is_empty() {
        info!("webhooks disabled (no subscriber URLs configured)");
    }

    // Provider services; each is present only when configured
    let provider_timeout = Duration::from_secs(config.provider_timeout_secs);
    let enrichment_svc = config.enrichment_enabled().then(|| {
        info!(model = %config.enrichment_model, "enrichment service initialized");
        Arc::new(enrichment::Service::new(
            config.openai_api_key.clone(),
            config.enrichment_model.clone(),
            provider_timeout,
        ))
    });
    let embedding_svc = config.embedding_enabled().then(|| {
        info!(model = %config.embedding_model, "embedding service initialized");
        Arc::new(embedding::Service::new(
            config.openai_api_key.clone(),
            config.embedding_model.clone(),
            provider_timeout,
        ))
    });

    // Worker pool processes both derivation job kinds
    let workers = config.derivation_enabled().then(|| {
        WorkerPool::start(
            WorkerContext {
                pool: pool.clone(),
                enrichment: enrichment_svc.clone(),
                embedding: embedding_svc.clone(),
                dispatcher: dispatcher.clone(),
            },
            config.worker_count,
            Duration::from_secs(config.worker_poll_interval_secs),
        )
    });

    // Rate limiting with background eviction of idle per-IP buckets
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_per_ip,
        config.rate_limit_burst,
        config.rate_limit_global,
        config.rate_limit_global_burst,
    ));
    let _sweeper = spawn_sweeper(limiter.clone());

    let state = AppState {
        db: pool.clone(),
        config: config.clone(),
        dispatcher: dispatcher.clone(),
        embedding: embedding_svc,
    };

    let app = build_router(state, limiter)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = config.address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {addr} (docs at http://{addr}/docs)");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Drain order: stop claiming jobs, then flush webhook deliveries, then
    // release the pool.
    info!("shutting down gracefully...");
    if let Some(workers) = workers {
        workers.stop().await;
    }
    if let Err(err) = dispatcher.shutdown(WEBHOOK_SHUTDOWN_TIMEOUT).await {
        error!(error = %err, "webhook dispatcher shutdown error");
    }
    pool.close().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
}
