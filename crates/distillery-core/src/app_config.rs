use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub industries_path: PathBuf,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,

    /// Master switch for the distillation path. When `false`, ingestion stores
    /// the scrape and returns the unfiltered content without signals.
    pub distillation_enabled: bool,
    pub scrape_ttl_days: i64,
    pub sweep_cron: String,
    pub decay_cron: String,

    /// Base URL of the embedding provider. `None` disables semantic matching
    /// entirely; the matcher then runs keyword-only.
    pub embedding_url: Option<String>,
    pub embedding_api_key: Option<String>,
    pub embedding_timeout_secs: u64,
    pub embedding_max_retries: u32,
    pub embedding_backoff_base_ms: u64,
    pub embedding_batch_size: usize,
    pub embedding_cache_ttl_secs: u64,
    pub embedding_cost_per_1k_tokens: f64,

    pub similarity_threshold: f64,
    pub decay_half_life_days: f64,
    pub learning_rate: f64,
    /// Blend of the Bayesian, decayed and reinforced confidence components.
    /// The three weights sum to 1.
    pub weight_bayesian: f64,
    pub weight_decayed: f64,
    pub weight_reinforced: f64,
    pub outlier_z_threshold: f64,
    pub verified_threshold: f64,
    pub feedback_rate_limit: u32,
    pub feedback_rate_window_secs: u64,
    pub max_write_retries: u32,
    pub idempotency_window_secs: i64,
    pub stale_after_days: i64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("industries_path", &self.industries_path)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("distillation_enabled", &self.distillation_enabled)
            .field("scrape_ttl_days", &self.scrape_ttl_days)
            .field("sweep_cron", &self.sweep_cron)
            .field("decay_cron", &self.decay_cron)
            .field("embedding_url", &self.embedding_url)
            .field(
                "embedding_api_key",
                &self.embedding_api_key.as_ref().map(|_| "[redacted]"),
            )
            .field("embedding_timeout_secs", &self.embedding_timeout_secs)
            .field("embedding_max_retries", &self.embedding_max_retries)
            .field("embedding_backoff_base_ms", &self.embedding_backoff_base_ms)
            .field("embedding_batch_size", &self.embedding_batch_size)
            .field("embedding_cache_ttl_secs", &self.embedding_cache_ttl_secs)
            .field(
                "embedding_cost_per_1k_tokens",
                &self.embedding_cost_per_1k_tokens,
            )
            .field("similarity_threshold", &self.similarity_threshold)
            .field("decay_half_life_days", &self.decay_half_life_days)
            .field("learning_rate", &self.learning_rate)
            .field("weight_bayesian", &self.weight_bayesian)
            .field("weight_decayed", &self.weight_decayed)
            .field("weight_reinforced", &self.weight_reinforced)
            .field("outlier_z_threshold", &self.outlier_z_threshold)
            .field("verified_threshold", &self.verified_threshold)
            .field("feedback_rate_limit", &self.feedback_rate_limit)
            .field("feedback_rate_window_secs", &self.feedback_rate_window_secs)
            .field("max_write_retries", &self.max_write_retries)
            .field("idempotency_window_secs", &self.idempotency_window_secs)
            .field("stale_after_days", &self.stale_after_days)
            .finish()
    }
}
