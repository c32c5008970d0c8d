use std::str::FromStr;

use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Parsing and validation are decoupled from the process environment so they
/// can be tested with a plain `HashMap` lookup.
#[allow(clippy::too_many_lines)]
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let parse = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        parse_value::<SocketAddr>(var, &or_default(var, default))
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("DISTILLERY_ENV", "development"))?;
    let bind_addr = parse("DISTILLERY_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("DISTILLERY_LOG_LEVEL", "info");
    let industries_path = PathBuf::from(or_default(
        "DISTILLERY_INDUSTRIES_PATH",
        "./config/industries.yaml",
    ));

    let num = |var: &str, default: &str| or_default(var, default);

    let db_max_connections = parse_value(
        "DISTILLERY_DB_MAX_CONNECTIONS",
        &num("DISTILLERY_DB_MAX_CONNECTIONS", "10"),
    )?;
    let db_min_connections = parse_value(
        "DISTILLERY_DB_MIN_CONNECTIONS",
        &num("DISTILLERY_DB_MIN_CONNECTIONS", "1"),
    )?;
    let db_acquire_timeout_secs = parse_value(
        "DISTILLERY_DB_ACQUIRE_TIMEOUT_SECS",
        &num("DISTILLERY_DB_ACQUIRE_TIMEOUT_SECS", "10"),
    )?;

    let distillation_enabled = parse_bool(
        "DISTILLERY_DISTILLATION_ENABLED",
        &num("DISTILLERY_DISTILLATION_ENABLED", "true"),
    )?;
    let scrape_ttl_days: i64 =
        parse_value("DISTILLERY_SCRAPE_TTL_DAYS", &num("DISTILLERY_SCRAPE_TTL_DAYS", "7"))?;
    if scrape_ttl_days < 1 {
        return Err(ConfigError::InvalidEnvVar {
            var: "DISTILLERY_SCRAPE_TTL_DAYS".to_string(),
            reason: "must be at least 1 day".to_string(),
        });
    }
    let sweep_cron = or_default("DISTILLERY_SWEEP_CRON", "0 */15 * * * *");
    let decay_cron = or_default("DISTILLERY_DECAY_CRON", "0 30 3 * * *");

    let embedding_url = lookup("DISTILLERY_EMBEDDING_URL")
        .ok()
        .map(|u| u.trim().trim_end_matches('/').to_string())
        .filter(|u| !u.is_empty());
    let embedding_api_key = lookup("DISTILLERY_EMBEDDING_API_KEY").ok();
    let embedding_timeout_secs = parse_value(
        "DISTILLERY_EMBEDDING_TIMEOUT_SECS",
        &num("DISTILLERY_EMBEDDING_TIMEOUT_SECS", "10"),
    )?;
    let embedding_max_retries = parse_value(
        "DISTILLERY_EMBEDDING_MAX_RETRIES",
        &num("DISTILLERY_EMBEDDING_MAX_RETRIES", "2"),
    )?;
    let embedding_backoff_base_ms = parse_value(
        "DISTILLERY_EMBEDDING_BACKOFF_BASE_MS",
        &num("DISTILLERY_EMBEDDING_BACKOFF_BASE_MS", "500"),
    )?;
    let embedding_batch_size: usize = parse_value(
        "DISTILLERY_EMBEDDING_BATCH_SIZE",
        &num("DISTILLERY_EMBEDDING_BATCH_SIZE", "100"),
    )?;
    if !(1..=100).contains(&embedding_batch_size) {
        return Err(ConfigError::InvalidEnvVar {
            var: "DISTILLERY_EMBEDDING_BATCH_SIZE".to_string(),
            reason: "must be between 1 and 100".to_string(),
        });
    }
    let embedding_cache_ttl_secs = parse_value(
        "DISTILLERY_EMBEDDING_CACHE_TTL_SECS",
        &num("DISTILLERY_EMBEDDING_CACHE_TTL_SECS", "3600"),
    )?;
    let embedding_cost_per_1k_tokens = parse_value(
        "DISTILLERY_EMBEDDING_COST_PER_1K_TOKENS",
        &num("DISTILLERY_EMBEDDING_COST_PER_1K_TOKENS", "0.0001"),
    )?;

    let similarity_threshold = parse_unit_interval(
        "DISTILLERY_SIMILARITY_THRESHOLD",
        &num("DISTILLERY_SIMILARITY_THRESHOLD", "0.75"),
    )?;
    let decay_half_life_days: f64 = parse_value(
        "DISTILLERY_DECAY_HALF_LIFE_DAYS",
        &num("DISTILLERY_DECAY_HALF_LIFE_DAYS", "30"),
    )?;
    if decay_half_life_days <= 0.0 || !decay_half_life_days.is_finite() {
        return Err(ConfigError::InvalidEnvVar {
            var: "DISTILLERY_DECAY_HALF_LIFE_DAYS".to_string(),
            reason: "must be a positive number of days".to_string(),
        });
    }
    let learning_rate = parse_unit_interval(
        "DISTILLERY_LEARNING_RATE",
        &num("DISTILLERY_LEARNING_RATE", "0.1"),
    )?;
    let weight_bayesian = parse_unit_interval(
        "DISTILLERY_WEIGHT_BAYESIAN",
        &num("DISTILLERY_WEIGHT_BAYESIAN", "0.4"),
    )?;
    let weight_decayed = parse_unit_interval(
        "DISTILLERY_WEIGHT_DECAYED",
        &num("DISTILLERY_WEIGHT_DECAYED", "0.3"),
    )?;
    let weight_reinforced = parse_unit_interval(
        "DISTILLERY_WEIGHT_REINFORCED",
        &num("DISTILLERY_WEIGHT_REINFORCED", "0.3"),
    )?;
    let weight_sum = weight_bayesian + weight_decayed + weight_reinforced;
    if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(ConfigError::InvalidEnvVar {
            var: "DISTILLERY_WEIGHT_*".to_string(),
            reason: format!("aggregation weights sum to {weight_sum}, expected 1"),
        });
    }
    let outlier_z_threshold: f64 = parse_value(
        "DISTILLERY_OUTLIER_Z_THRESHOLD",
        &num("DISTILLERY_OUTLIER_Z_THRESHOLD", "3.0"),
    )?;
    let verified_threshold = parse_unit_interval(
        "DISTILLERY_VERIFIED_THRESHOLD",
        &num("DISTILLERY_VERIFIED_THRESHOLD", "0.8"),
    )?;
    let feedback_rate_limit = parse_value(
        "DISTILLERY_FEEDBACK_RATE_LIMIT",
        &num("DISTILLERY_FEEDBACK_RATE_LIMIT", "10"),
    )?;
    let feedback_rate_window_secs = parse_value(
        "DISTILLERY_FEEDBACK_RATE_WINDOW_SECS",
        &num("DISTILLERY_FEEDBACK_RATE_WINDOW_SECS", "60"),
    )?;
    let max_write_retries = parse_value(
        "DISTILLERY_MAX_WRITE_RETRIES",
        &num("DISTILLERY_MAX_WRITE_RETRIES", "5"),
    )?;
    let idempotency_window_secs = parse_value(
        "DISTILLERY_IDEMPOTENCY_WINDOW_SECS",
        &num("DISTILLERY_IDEMPOTENCY_WINDOW_SECS", "60"),
    )?;
    let stale_after_days = parse_value(
        "DISTILLERY_STALE_AFTER_DAYS",
        &num("DISTILLERY_STALE_AFTER_DAYS", "7"),
    )?;

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        industries_path,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        distillation_enabled,
        scrape_ttl_days,
        sweep_cron,
        decay_cron,
        embedding_url,
        embedding_api_key,
        embedding_timeout_secs,
        embedding_max_retries,
        embedding_backoff_base_ms,
        embedding_batch_size,
        embedding_cache_ttl_secs,
        embedding_cost_per_1k_tokens,
        similarity_threshold,
        decay_half_life_days,
        learning_rate,
        weight_bayesian,
        weight_decayed,
        weight_reinforced,
        outlier_z_threshold,
        verified_threshold,
        feedback_rate_limit,
        feedback_rate_window_secs,
        max_write_retries,
        idempotency_window_secs,
        stale_after_days,
    })
}

fn parse_value<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

fn parse_bool(var: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_unit_interval(var: &str, raw: &str) -> Result<f64, ConfigError> {
    let value: f64 = parse_value(var, raw)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: format!("{value} is outside [0, 1]"),
        });
    }
    Ok(value)
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "DISTILLERY_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
