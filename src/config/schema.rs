//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the dispatcher.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the webhook dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DispatchConfig {
    /// Default circuit breaker settings.
    pub breaker: BreakerConfig,

    /// Per-dependency breaker overrides, keyed by dependency name.
    pub breakers: HashMap<String, BreakerConfig>,

    /// Job queue settings.
    pub queue: QueueConfig,

    /// Retention windows for terminal jobs.
    pub retention: RetentionConfig,

    /// Outbound HTTP delivery settings.
    pub delivery: DeliveryConfig,

    /// Job store settings.
    pub store: StoreConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures (while closed) that open the circuit.
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,

    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,

    /// Delay before an open circuit admits a trial call, in milliseconds.
    pub reset_timeout_ms: u64,
}

impl BreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 30_000,
            reset_timeout_ms: 60_000,
        }
    }
}

/// Job queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Attempts per job before it is marked permanently failed.
    pub max_attempts: u32,

    /// Backoff base in milliseconds.
    pub base_delay_ms: u64,

    /// Backoff cap in milliseconds.
    pub max_delay_ms: u64,

    /// Simultaneous deliveries.
    pub concurrency: usize,

    /// Lease held by a worker on an active job, in seconds.
    pub lease_secs: u64,

    /// Idle poll interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Interval between retention sweeps, in seconds.
    pub sweep_interval_secs: u64,

    /// Time `close()` waits for in-flight jobs, in seconds.
    pub drain_timeout_secs: u64,
}

impl QueueConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 300_000,
            concurrency: 10,
            lease_secs: 60,
            poll_interval_ms: 250,
            sweep_interval_secs: 60,
            drain_timeout_secs: 30,
        }
    }
}

/// How long terminal jobs stay inspectable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Completed jobs, in seconds.
    pub completed_secs: u64,

    /// Permanently failed jobs, in seconds.
    pub failed_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            completed_secs: 24 * 60 * 60,
            failed_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Outbound HTTP delivery settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Hard request timeout in seconds.
    pub timeout_secs: u64,

    /// User-Agent header sent with every delivery.
    pub user_agent: String,

    /// Characters of a successful response body kept in the result.
    pub response_body_limit: usize,

    /// Characters of a failed response body kept in the error.
    pub error_snippet_limit: usize,

    /// Breaker family guarding deliveries. Each target host gets its own
    /// breaker named `<family>:<host>:<port>`. Empty disables breakers.
    pub breaker: String,
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("webhook-dispatch/", env!("CARGO_PKG_VERSION")).to_string(),
            response_body_limit: 1000,
            error_snippet_limit: 200,
            breaker: "webhook-delivery".to_string(),
        }
    }
}

/// Job store configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Snapshot file loaded at startup and written on flush.
    pub snapshot_path: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum accepted body size for enqueue requests.
    pub max_body_bytes: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
            request_timeout_secs: 10,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl DispatchConfig {
    /// Breaker settings for a dependency. A per-target name such as
    /// `webhook-delivery:example.com:443` falls back to its family
    /// (`webhook-delivery`), then to the defaults.
    pub fn breaker_for(&self, name: &str) -> BreakerConfig {
        lookup_breaker(&self.breakers, &self.breaker, name)
    }
}

pub(crate) fn lookup_breaker(
    overrides: &HashMap<String, BreakerConfig>,
    default: &BreakerConfig,
    name: &str,
) -> BreakerConfig {
    overrides
        .get(name)
        .or_else(|| name.split_once(':').and_then(|(family, _)| overrides.get(family)))
        .cloned()
        .unwrap_or_else(|| default.clone())
}
