//! Component health states and aggregation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

/// Health of a single component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Working, but with reduced capacity.
    Degraded(String),
    Unhealthy(String),
    /// The component does not report health.
    Unsupported,
}

impl HealthStatus {
    pub fn degraded(reason: impl Into<String>) -> Self {
        HealthStatus::Degraded(reason.into())
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        HealthStatus::Unhealthy(reason.into())
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }

    fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy | HealthStatus::Unsupported => 0,
            HealthStatus::Degraded(_) => 1,
            HealthStatus::Unhealthy(_) => 2,
        }
    }
}

/// Capability to report health. Components that cannot tell keep the default.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Name shown in health reports.
    fn component(&self) -> &str;

    async fn check_health(&self) -> HealthStatus {
        HealthStatus::Unsupported
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub component: String,
    #[serde(flatten)]
    pub status: HealthStatus,
}

/// Aggregate over all components.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub degraded: bool,
    pub components: Vec<ComponentHealth>,
}

pub async fn check_all(checks: &[Arc<dyn HealthCheck>]) -> HealthReport {
    let mut components = Vec::with_capacity(checks.len());
    let mut worst = 0;

    for check in checks {
        let status = check.check_health().await;
        worst = worst.max(status.severity());
        if status.severity() > 0 {
            tracing::warn!(component = check.component(), ?status, "Component not healthy");
        }
        components.push(ComponentHealth {
            component: check.component().to_string(),
            status,
        });
    }

    HealthReport {
        healthy: worst < 2,
        degraded: worst == 1,
        components,
    }
}
