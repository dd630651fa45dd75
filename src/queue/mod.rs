//! Durable webhook job queue.
//!
//! # Data Flow
//! ```text
//! enqueue(NewDelivery)
//!     → DeliveryJob::new (validate, assign delivery id)
//!     → JobStore::push (Waiting)
//!
//! worker.rs (per start_worker call):
//!     claim (lease) → JobProcessor::process
//!     → complete | fail(retry_at) | fail(None)
//! ```
//!
//! # Design Decisions
//! - The store owns scheduling: backoff is a `run_at` timestamp, never a
//!   sleep holding a worker slot
//! - A job is owned only through its lease token
//! - Retention windows are hot-swappable, queue sizing is not

pub mod memory;
pub mod store;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{QueueConfig, RetentionConfig};
use crate::delivery::{DeliveryJob, NewDelivery};
use crate::error::{QueueError, QueueResult};
use crate::events::{DispatchEvent, EventBus};
use crate::health::{HealthCheck, HealthStatus};
use crate::lifecycle::Shutdown;
use crate::resilience::retries::{with_retry, RetryPolicy};

pub use memory::MemoryJobStore;
pub use store::{ClaimedJob, JobRecord, JobState, JobStore, Lease, QueueMetrics};
pub use worker::JobProcessor;

struct QueueInner {
    store: Arc<dyn JobStore>,
    config: QueueConfig,
    retention: Arc<ArcSwap<RetentionConfig>>,
    events: EventBus,
    accepting: AtomicBool,
    shutdown: Shutdown,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Cloneable handle to the queue.
#[derive(Clone)]
pub struct WebhookQueue {
    inner: Arc<QueueInner>,
}

impl WebhookQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        config: QueueConfig,
        retention: RetentionConfig,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                store,
                config,
                retention: Arc::new(ArcSwap::from_pointee(retention)),
                events,
                accepting: AtomicBool::new(true),
                shutdown: Shutdown::new(),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Validate and persist a delivery for asynchronous processing.
    pub async fn enqueue(&self, delivery: NewDelivery) -> QueueResult<Uuid> {
        if !self.is_accepting() {
            return Err(QueueError::Closed);
        }

        let job = DeliveryJob::new(delivery)?;
        let delivery_id = job.delivery_id;
        let webhook_id = job.webhook_id.clone();
        let event_type = job.event_type.clone();

        self.inner.store.push(job, Utc::now()).await?;

        self.inner.events.publish(DispatchEvent::JobEnqueued {
            delivery_id,
            webhook_id,
            event_type,
        });
        Ok(delivery_id)
    }

    /// Spawn a worker pool that feeds jobs to `processor`.
    pub fn start_worker(&self, processor: Arc<dyn JobProcessor>) -> QueueResult<()> {
        if !self.is_accepting() {
            return Err(QueueError::Closed);
        }

        let worker = worker::Worker::new(
            self.inner.store.clone(),
            processor,
            self.inner.events.clone(),
            self.inner.config.clone(),
            self.inner.retention.clone(),
        );
        let handle = tokio::spawn(worker.run(self.inner.shutdown.subscribe()));
        self.workers().push(handle);
        Ok(())
    }

    /// Point-in-time job counts per bucket.
    pub async fn metrics(&self) -> QueueResult<QueueMetrics> {
        self.inner.store.counts(Utc::now()).await
    }

    pub async fn get(&self, delivery_id: Uuid) -> QueueResult<Option<JobRecord>> {
        self.inner.store.get(delivery_id).await
    }

    /// Deliveries for `webhook_id`, newest first.
    pub async fn history(&self, webhook_id: &str, offset: usize, limit: usize) -> QueueResult<Vec<JobRecord>> {
        self.inner.store.history(webhook_id, offset, limit).await
    }

    pub fn retention(&self) -> RetentionConfig {
        self.inner.retention.load().as_ref().clone()
    }

    pub fn set_retention(&self, retention: RetentionConfig) {
        if *self.inner.retention.load_full() != retention {
            tracing::info!(
                completed_secs = retention.completed_secs,
                failed_secs = retention.failed_secs,
                "Retention windows updated"
            );
            self.inner.retention.store(Arc::new(retention));
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting, drain workers, then flush the store.
    pub async fn close(&self) -> QueueResult<()> {
        if self.inner.accepting.swap(false, Ordering::AcqRel) {
            tracing::info!("Webhook queue closing");
        }
        self.inner.shutdown.trigger();

        let handles = std::mem::take(&mut *self.workers());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task failed during shutdown");
            }
        }

        let policy = RetryPolicy::<QueueError>::database()
            .retry_if(|e: &QueueError| matches!(e, QueueError::Unavailable(_)));
        with_retry(|| self.inner.store.flush(), &policy)
            .await
            .map_err(|e| e.into_inner())?;

        tracing::info!("Webhook queue closed");
        Ok(())
    }

    fn workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HealthCheck for WebhookQueue {
    fn component(&self) -> &str {
        "queue"
    }

    async fn check_health(&self) -> HealthStatus {
        if !self.is_accepting() {
            return HealthStatus::unhealthy("queue is closed");
        }
        match self.inner.store.ping().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::unhealthy(e.to_string()),
        }
    }
}
