//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from a validated config, in dependency order
//! - Wait for the job store before starting workers
//! - Own the shared registry, queue and event bus for the process lifetime
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Hot reload only touches breaker thresholds and retention windows

use std::path::Path;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::config::DispatchConfig;
use crate::delivery::WebhookProcessor;
use crate::error::{QueueError, RetryError};
use crate::events::EventBus;
use crate::health::{check_all, HealthCheck, HealthReport};
use crate::lifecycle::Shutdown;
use crate::observability::logging::run_event_logger;
use crate::queue::{JobStore, MemoryJobStore, WebhookQueue};
use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
use crate::resilience::retries::{with_retry, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("job store did not become ready: {0}")]
    Store(#[from] RetryError<QueueError>),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to build delivery client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Composition root: the running delivery subsystem.
pub struct Dispatcher {
    config: ArcSwap<DispatchConfig>,
    events: EventBus,
    breakers: Arc<CircuitBreakerRegistry>,
    queue: WebhookQueue,
    health: Vec<Arc<dyn HealthCheck>>,
    shutdown: Shutdown,
    logger: Mutex<Option<JoinHandle<()>>>,
    started_at: DateTime<Utc>,
}

impl Dispatcher {
    /// Start with the store named by `config.store`.
    pub async fn start(config: DispatchConfig) -> Result<Self, StartupError> {
        let store: Arc<dyn JobStore> = match &config.store.snapshot_path {
            Some(path) => Arc::new(MemoryJobStore::open(Path::new(path))?),
            None => Arc::new(MemoryJobStore::new()),
        };
        Self::start_with_store(config, store).await
    }

    pub async fn start_with_store(config: DispatchConfig, store: Arc<dyn JobStore>) -> Result<Self, StartupError> {
        let events = EventBus::default();
        let shutdown = Shutdown::new();
        let logger = tokio::spawn(run_event_logger(events.subscribe(), shutdown.subscribe()));

        let breakers = Arc::new(CircuitBreakerRegistry::from_config(&config).with_events(events.clone()));

        let policy = RetryPolicy::<QueueError>::database();
        with_retry(|| store.ping(), &policy).await?;
        tracing::info!("Job store ready");

        let queue = WebhookQueue::new(
            store,
            config.queue.clone(),
            config.retention.clone(),
            events.clone(),
        );

        let mut processor = WebhookProcessor::new(config.delivery.clone())?;
        if !config.delivery.breaker.is_empty() {
            processor = processor.with_breakers(breakers.clone(), config.delivery.breaker.clone());
        }
        let processor = Arc::new(processor);
        queue.start_worker(processor.clone())?;

        let queue_health: Arc<dyn HealthCheck> = Arc::new(queue.clone());
        let breaker_health: Arc<dyn HealthCheck> = breakers.clone();
        let processor_health: Arc<dyn HealthCheck> = processor;
        let health = vec![queue_health, breaker_health, processor_health];

        tracing::info!(
            concurrency = config.queue.concurrency,
            max_attempts = config.queue.max_attempts,
            breaker = %config.delivery.breaker,
            "Webhook dispatcher started"
        );

        Ok(Self {
            config: ArcSwap::from_pointee(config),
            events,
            breakers,
            queue,
            health,
            shutdown,
            logger: Mutex::new(Some(logger)),
            started_at: Utc::now(),
        })
    }

    pub fn queue(&self) -> &WebhookQueue {
        &self.queue
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> Arc<DispatchConfig> {
        self.config.load_full()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub async fn health(&self) -> HealthReport {
        check_all(&self.health).await
    }

    /// Swap in a reloaded config.
    pub fn apply_config(&self, config: DispatchConfig) {
        let current = self.config.load();
        if current.queue.concurrency != config.queue.concurrency
            || current.admin.bind_address != config.admin.bind_address
        {
            tracing::warn!("Queue sizing and bind addresses only change on restart");
        }

        self.breakers.reconfigure(&config);
        self.queue.set_retention(config.retention.clone());
        self.config.store(Arc::new(config));
        tracing::info!("Configuration reloaded");
    }

    /// Close the queue, then stop the event logger once it has drained.
    pub async fn close(&self) -> Result<(), QueueError> {
        let closed = self.queue.close().await;

        self.shutdown.trigger();
        let logger = self
            .logger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = logger {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Event logger task failed");
            }
        }

        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetentionConfig;

    #[tokio::test]
    async fn test_start_and_close() {
        let mut config = DispatchConfig::default();
        config.queue.poll_interval_ms = 5;
        let dispatcher = Dispatcher::start(config).await.unwrap();

        let report = dispatcher.health().await;
        assert!(report.healthy);
        // Breakers are created per target on first delivery.
        assert!(dispatcher.breakers().metrics().is_empty());

        dispatcher.close().await.unwrap();
        assert!(!dispatcher.queue().is_accepting());
        assert!(!dispatcher.health().await.healthy);
    }

    #[tokio::test]
    async fn test_apply_config_reaches_breakers_and_retention() {
        let dispatcher = Dispatcher::start(DispatchConfig::default()).await.unwrap();

        let mut config = DispatchConfig::default();
        config.breaker.failure_threshold = 9;
        config.retention = RetentionConfig { completed_secs: 5, failed_secs: 50 };
        dispatcher.apply_config(config.clone());

        assert_eq!(dispatcher.breakers().get("webhook-delivery").metrics().failure_threshold, 9);
        assert_eq!(dispatcher.queue().retention(), config.retention);
        assert_eq!(dispatcher.config().breaker.failure_threshold, 9);

        dispatcher.close().await.unwrap();
    }
}
