//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Turn bus events into structured log lines and metrics
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - JSON format for production, human format for development

use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::events::DispatchEvent;
use crate::observability::metrics;

/// Install the global subscriber. Call once, from `main`.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("webhook_dispatch={},tower_http=info", config.log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Log one event with its fields and count it.
pub fn log_event(event: &DispatchEvent) {
    metrics::record_job_event(event.name());

    match event {
        DispatchEvent::JobEnqueued { delivery_id, webhook_id, event_type } => {
            tracing::info!(%delivery_id, %webhook_id, %event_type, "Webhook job enqueued");
        }
        DispatchEvent::JobStarted { delivery_id, webhook_id, attempt } => {
            tracing::debug!(%delivery_id, %webhook_id, attempt, "Webhook delivery started");
        }
        DispatchEvent::JobSucceeded { delivery_id, webhook_id, attempt, status_code, duration_ms } => {
            tracing::info!(%delivery_id, %webhook_id, attempt, ?status_code, duration_ms, "Webhook delivered");
        }
        DispatchEvent::JobFailed { delivery_id, webhook_id, attempt, error, next_run_at } => {
            tracing::warn!(%delivery_id, %webhook_id, attempt, %error, %next_run_at, "Webhook delivery failed, rescheduled");
        }
        DispatchEvent::JobExhausted { delivery_id, webhook_id, attempts, error } => {
            tracing::error!(%delivery_id, %webhook_id, attempts, %error, "Webhook delivery exhausted all attempts");
        }
        DispatchEvent::LeaseExpired { delivery_id, attempt } => {
            tracing::warn!(%delivery_id, attempt, "Job lease expired, job is reschedulable");
        }
        DispatchEvent::BreakerStateChanged { breaker, from, to } => {
            tracing::info!(%breaker, from = from.as_str(), to = to.as_str(), "Circuit breaker transition");
        }
    }
}

/// Drain `events` into the log until shutdown or the bus closes.
pub async fn run_event_logger(
    mut events: broadcast::Receiver<DispatchEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.recv() => {
                // Flush whatever is already queued before exiting.
                while let Ok(event) = events.try_recv() {
                    log_event(&event);
                }
                break;
            }
        }
    }
    tracing::debug!("Event logger stopped");
}
