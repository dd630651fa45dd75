//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, delays ordered)
//! - Check addresses and URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DispatchConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{BreakerConfig, DispatchConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &DispatchConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_breaker("breaker", &config.breaker, &mut errors);
    for (name, breaker) in &config.breakers {
        validate_breaker(&format!("breakers.{name}"), breaker, &mut errors);
    }

    let queue = &config.queue;
    if queue.max_attempts == 0 {
        errors.push(ValidationError::new("queue.max_attempts", "must be at least 1"));
    }
    if queue.concurrency == 0 {
        errors.push(ValidationError::new("queue.concurrency", "must be at least 1"));
    }
    if queue.base_delay_ms == 0 {
        errors.push(ValidationError::new("queue.base_delay_ms", "must be greater than 0"));
    }
    if queue.max_delay_ms < queue.base_delay_ms {
        errors.push(ValidationError::new(
            "queue.max_delay_ms",
            "must not be smaller than queue.base_delay_ms",
        ));
    }
    if queue.poll_interval_ms == 0 {
        errors.push(ValidationError::new("queue.poll_interval_ms", "must be greater than 0"));
    }
    if queue.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("queue.sweep_interval_secs", "must be greater than 0"));
    }
    if queue.lease_secs <= config.delivery.timeout_secs {
        errors.push(ValidationError::new(
            "queue.lease_secs",
            "must exceed delivery.timeout_secs so a live attempt never loses its lease",
        ));
    }

    if config.retention.completed_secs == 0 {
        errors.push(ValidationError::new("retention.completed_secs", "must be greater than 0"));
    }
    if config.retention.failed_secs == 0 {
        errors.push(ValidationError::new("retention.failed_secs", "must be greater than 0"));
    }

    if config.delivery.timeout_secs == 0 {
        errors.push(ValidationError::new("delivery.timeout_secs", "must be greater than 0"));
    }
    if config.delivery.user_agent.trim().is_empty() {
        errors.push(ValidationError::new("delivery.user_agent", "must not be empty"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("'{}' is not a socket address", config.admin.bind_address),
            ));
        }
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(prefix: &str, breaker: &BreakerConfig, errors: &mut Vec<ValidationError>) {
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{prefix}.failure_threshold"),
            "must be at least 1",
        ));
    }
    if breaker.success_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{prefix}.success_threshold"),
            "must be at least 1",
        ));
    }
    if breaker.timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{prefix}.timeout_ms"), "must be greater than 0"));
    }
}
