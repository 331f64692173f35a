use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Only DATABASE_URL is required; everything else has a sensible default.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Shared secret for the X-API-Key header. Empty disables authentication.
    pub api_key: String,
    pub webhook_urls: Vec<String>,
    pub webhook_workers: usize,
    pub webhook_queue_size: usize,
    pub webhook_timeout_secs: u64,
    pub openai_api_key: String,
    pub enrichment_model: String,
    pub embedding_model: String,
    pub provider_timeout_secs: u64,
    pub worker_count: usize,
    pub worker_poll_interval_secs: u64,
    pub rate_limit_per_ip: u32,
    pub rate_limit_burst: u32,
    pub rate_limit_global: u32,
    pub rate_limit_global_burst: u32,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub log_level: String,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8080)?,
            api_key: env_or("API_KEY", ""),
            webhook_urls: parse_webhook_urls(&env_or("WEBHOOK_URLS", "")),
            webhook_workers: env_parse("WEBHOOK_WORKERS", 10)?,
            webhook_queue_size: env_parse("WEBHOOK_QUEUE_SIZE", 100)?,
            webhook_timeout_secs: env_parse("WEBHOOK_TIMEOUT_SECS", 5)?,
            openai_api_key: env_or("OPENAI_API_KEY", ""),
            enrichment_model: env_or("OPENAI_ENRICHMENT_MODEL", "gpt-4o-mini"),
            embedding_model: env_or("OPENAI_EMBEDDING_MODEL", "text-embedding-3-small"),
            provider_timeout_secs: env_parse("PROVIDER_TIMEOUT_SECS", 10)?,
            worker_count: env_parse("WORKER_COUNT", 3)?,
            worker_poll_interval_secs: env_parse("WORKER_POLL_INTERVAL_SECS", 1)?,
            rate_limit_per_ip: env_parse("RATE_LIMIT_PER_IP", 100)?,
            rate_limit_burst: env_parse("RATE_LIMIT_BURST", 200)?,
            rate_limit_global: env_parse("RATE_LIMIT_GLOBAL", 1000)?,
            rate_limit_global_burst: env_parse("RATE_LIMIT_GLOBAL_BURST", 2000)?,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 25)?,
            db_min_connections: env_parse("DB_MIN_CONNECTIONS", 5)?,
            log_level: env_or("LOG_LEVEL", "info"),
            environment: env_or("ENVIRONMENT", "development"),
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Sentiment/emotion/topic analysis is active iff both the provider key
    /// and the chat model are configured.
    pub fn enrichment_enabled(&self) -> bool {
        !self.openai_api_key.is_empty() && !self.enrichment_model.is_empty()
    }

    /// Embedding generation (and hence semantic search) is active iff both
    /// the provider key and the embedding model are configured.
    pub fn embedding_enabled(&self) -> bool {
        !self.openai_api_key.is_empty() && !self.embedding_model.is_empty()
    }

    /// Whether ingest should enqueue derivation jobs at all.
    pub fn derivation_enabled(&self) -> bool {
        self.enrichment_enabled() || self.embedding_enabled()
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value: {v}")),
        Err(_) => Ok(default),
    }
}

/// Splits the comma-separated WEBHOOK_URLS value, trimming whitespace and
/// dropping empty entries.
pub fn parse_webhook_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_webhook_urls_empty() {
        assert!(parse_webhook_urls("").is_empty());
        assert!(parse_webhook_urls("  , ,").is_empty());
    }

    #[test]
    fn test_parse_webhook_urls_trims() {
        let urls = parse_webhook_urls(" https://a.example/hook , https://b.example/hook");
        assert_eq!(
            urls,
            vec![
                "https://a.example/hook".to_string(),
                "https://b.example/hook".to_string()
            ]
        );
    }

    #[test]
    fn test_parse_webhook_urls_single() {
        assert_eq!(
            parse_webhook_urls("https://a.example/hook"),
            vec!["https://a.example/hook".to_string()]
        );
    }
}
