//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::config::schema::DispatchConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from a TOML file, apply environment overrides, validate.
pub fn load_config(path: &Path) -> Result<DispatchConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: DispatchConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Defaults plus environment overrides, validated. Used when no file is given.
pub fn load_from_env() -> Result<DispatchConfig, ConfigError> {
    let mut config = DispatchConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `DISPATCH_*` overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut DispatchConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    override_parsed(&lookup, "DISPATCH_BREAKER_FAILURE_THRESHOLD", &mut config.breaker.failure_threshold)?;
    override_parsed(&lookup, "DISPATCH_BREAKER_SUCCESS_THRESHOLD", &mut config.breaker.success_threshold)?;
    override_parsed(&lookup, "DISPATCH_BREAKER_TIMEOUT_MS", &mut config.breaker.timeout_ms)?;
    override_parsed(&lookup, "DISPATCH_BREAKER_RESET_TIMEOUT_MS", &mut config.breaker.reset_timeout_ms)?;
    override_parsed(&lookup, "DISPATCH_QUEUE_MAX_ATTEMPTS", &mut config.queue.max_attempts)?;
    override_parsed(&lookup, "DISPATCH_QUEUE_BASE_DELAY_MS", &mut config.queue.base_delay_ms)?;
    override_parsed(&lookup, "DISPATCH_QUEUE_MAX_DELAY_MS", &mut config.queue.max_delay_ms)?;
    override_parsed(&lookup, "DISPATCH_QUEUE_CONCURRENCY", &mut config.queue.concurrency)?;
    override_parsed(&lookup, "DISPATCH_RETENTION_COMPLETED_SECS", &mut config.retention.completed_secs)?;
    override_parsed(&lookup, "DISPATCH_RETENTION_FAILED_SECS", &mut config.retention.failed_secs)?;

    if let Some(key) = lookup("DISPATCH_ADMIN_API_KEY") {
        config.admin.api_key = key;
    }
    if let Some(path) = lookup("DISPATCH_STORE_SNAPSHOT_PATH") {
        config.store.snapshot_path = Some(path);
    }
    Ok(())
}

fn override_parsed<F, T>(lookup: &F, var: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(value) = lookup(var) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { var, value })?;
    }
    Ok(())
}
