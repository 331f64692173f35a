use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::Config;

/// Creates and returns a PostgreSQL connection pool shared by the HTTP
/// handlers, the enrichment workers, and the job queue.
pub async fn create_pool(config: &Config) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .max_lifetime(Duration::from_secs(5 * 60))
        .idle_timeout(Duration::from_secs(5 * 60))
        .connect(&config.database_url)
        .await?;

    info!(
        max_connections = config.db_max_connections,
        min_connections = config.db_min_connections,
        "PostgreSQL connection pool established"
    );
    Ok(pool)
}
