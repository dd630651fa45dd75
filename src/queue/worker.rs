//! Worker loop: claim, process, acknowledge.
//!
//! # Responsibilities
//! - Keep up to `concurrency` jobs in flight, one task per job
//! - Translate processor outcomes into completion, rescheduling or exhaustion
//! - Periodically purge expired jobs and publish queue depth
//! - Drain in-flight jobs on shutdown, releasing leases that miss the deadline

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use uuid::Uuid;

use crate::config::{QueueConfig, RetentionConfig};
use crate::delivery::{DeliveryJob, WebhookDeliveryResult};
use crate::error::{DeliveryError, QueueError};
use crate::events::{DispatchEvent, EventBus};
use crate::observability::metrics;
use crate::queue::store::{ClaimedJob, JobStore};
use crate::resilience::backoff::queue_backoff;

/// Performs one delivery attempt. Must not retry internally.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &DeliveryJob) -> Result<WebhookDeliveryResult, DeliveryError>;
}

/// Per-job handling shared by every spawned task.
#[derive(Clone)]
struct JobRunner {
    store: Arc<dyn JobStore>,
    processor: Arc<dyn JobProcessor>,
    events: EventBus,
    config: QueueConfig,
    in_flight: Arc<DashMap<Uuid, Uuid>>,
}

impl JobRunner {
    async fn run(self, claimed: ClaimedJob, _permit: OwnedSemaphorePermit) {
        let delivery_id = claimed.job.delivery_id;
        self.in_flight.insert(delivery_id, claimed.lease_token);
        self.handle(claimed).await;
        self.in_flight.remove(&delivery_id);
    }

    async fn handle(&self, claimed: ClaimedJob) {
        let ClaimedJob { job, lease_token, reclaimed } = claimed;
        let attempt = job.attempt_count;
        let max_attempts = self.config.max_attempts;

        if reclaimed {
            let lost = attempt.saturating_sub(1);
            self.events.publish(DispatchEvent::LeaseExpired {
                delivery_id: job.delivery_id,
                attempt: lost,
            });

            let error = DeliveryError::Timeout { after: self.config.lease() };
            let result = WebhookDeliveryResult::failed(lost, &error, 0);

            // The lost attempt was the last one allowed.
            if attempt > max_attempts {
                let acked = self.store.fail(job.delivery_id, lease_token, result, None, Utc::now()).await;
                if self.acknowledged(&job, acked) {
                    self.events.publish(DispatchEvent::JobExhausted {
                        delivery_id: job.delivery_id,
                        webhook_id: job.webhook_id.clone(),
                        attempts: lost,
                        error: error.to_string(),
                    });
                }
                return;
            }

            let recorded = self.store.record_attempt(job.delivery_id, lease_token, result).await;
            if !self.acknowledged(&job, recorded) {
                return;
            }
        }

        self.events.publish(DispatchEvent::JobStarted {
            delivery_id: job.delivery_id,
            webhook_id: job.webhook_id.clone(),
            attempt,
        });

        let started = Instant::now();
        let outcome = self.processor.process(&job).await;
        let elapsed = started.elapsed();
        metrics::record_delivery(outcome.is_ok(), elapsed);

        match outcome {
            Ok(result) => {
                let status_code = result.status_code;
                let duration_ms = result.duration_ms;
                let acked = self.store.complete(job.delivery_id, lease_token, result, Utc::now()).await;
                if self.acknowledged(&job, acked) {
                    self.events.publish(DispatchEvent::JobSucceeded {
                        delivery_id: job.delivery_id,
                        webhook_id: job.webhook_id.clone(),
                        attempt,
                        status_code,
                        duration_ms,
                    });
                }
            }
            Err(error) => {
                tracing::debug!(
                    delivery_id = %job.delivery_id,
                    attempt,
                    kind = error.kind(),
                    error = %error,
                    "Delivery attempt failed"
                );
                let result = WebhookDeliveryResult::failed(attempt, &error, elapsed.as_millis() as u64);
                let now = Utc::now();

                if error.is_retryable() && attempt < max_attempts {
                    let delay = queue_backoff(attempt, self.config.base_delay(), self.config.max_delay());
                    let next_run_at = now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
                    let acked = self
                        .store
                        .fail(job.delivery_id, lease_token, result, Some(next_run_at), now)
                        .await;
                    if self.acknowledged(&job, acked) {
                        self.events.publish(DispatchEvent::JobFailed {
                            delivery_id: job.delivery_id,
                            webhook_id: job.webhook_id.clone(),
                            attempt,
                            error: error.to_string(),
                            next_run_at,
                        });
                    }
                } else {
                    let acked = self.store.fail(job.delivery_id, lease_token, result, None, now).await;
                    if self.acknowledged(&job, acked) {
                        self.events.publish(DispatchEvent::JobExhausted {
                            delivery_id: job.delivery_id,
                            webhook_id: job.webhook_id.clone(),
                            attempts: attempt,
                            error: error.to_string(),
                        });
                    }
                }
            }
        }
    }

    fn acknowledged(&self, job: &DeliveryJob, result: Result<(), QueueError>) -> bool {
        match result {
            Ok(()) => true,
            Err(QueueError::LeaseLost(_)) => {
                tracing::warn!(
                    delivery_id = %job.delivery_id,
                    attempt = job.attempt_count,
                    "Lease lost before acknowledgement, result discarded"
                );
                false
            }
            Err(e) => {
                tracing::error!(delivery_id = %job.delivery_id, error = %e, "Failed to acknowledge job");
                false
            }
        }
    }
}

/// A single worker pulling from the store until shutdown.
pub(crate) struct Worker {
    runner: JobRunner,
    retention: Arc<ArcSwap<RetentionConfig>>,
}

impl Worker {
    pub(crate) fn new(
        store: Arc<dyn JobStore>,
        processor: Arc<dyn JobProcessor>,
        events: EventBus,
        config: QueueConfig,
        retention: Arc<ArcSwap<RetentionConfig>>,
    ) -> Self {
        Self {
            runner: JobRunner {
                store,
                processor,
                events,
                config,
                in_flight: Arc::new(DashMap::new()),
            },
            retention,
        }
    }

    pub(crate) async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let config = &self.runner.config;
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut sweep = time::interval(config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(concurrency = config.concurrency, "Webhook worker starting");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = sweep.tick() => self.sweep().await,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Delivery task panicked");
                    }
                }
                permit = semaphore.clone().acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    match self.runner.store.claim(Utc::now(), config.lease()).await {
                        Ok(Some(claimed)) => {
                            tasks.spawn(self.runner.clone().run(claimed, permit));
                        }
                        Ok(None) => {
                            drop(permit);
                            if idle(&mut shutdown, config).await {
                                break;
                            }
                        }
                        Err(e) => {
                            drop(permit);
                            tracing::warn!(error = %e, "Failed to claim job");
                            if idle(&mut shutdown, config).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.drain(tasks).await;
        tracing::info!("Webhook worker stopped");
    }

    async fn sweep(&self) {
        let now = Utc::now();
        let retention = self.retention.load_full();
        match self.runner.store.purge(now, &retention).await {
            Ok(0) => {}
            Ok(purged) => tracing::info!(purged, "Purged expired jobs"),
            Err(e) => tracing::warn!(error = %e, "Failed to purge expired jobs"),
        }
        match self.runner.store.counts(now).await {
            Ok(counts) => metrics::record_queue_depth(&counts),
            Err(e) => tracing::warn!(error = %e, "Failed to read queue depth"),
        }
    }

    async fn drain(&self, mut tasks: JoinSet<()>) {
        let deadline = self.runner.config.drain_timeout();
        tracing::info!(in_flight = tasks.len(), ?deadline, "Draining in-flight deliveries");

        let drained = time::timeout(deadline, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_ok() {
            return;
        }

        tracing::warn!(remaining = tasks.len(), "Drain deadline exceeded, aborting deliveries");
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        let now = Utc::now();
        let abandoned: Vec<(Uuid, Uuid)> = self
            .runner
            .in_flight
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        for (delivery_id, token) in abandoned {
            self.runner.in_flight.remove(&delivery_id);
            if let Err(e) = self.runner.store.release(delivery_id, token, now).await {
                tracing::warn!(%delivery_id, error = %e, "Failed to release lease, it will expire");
            }
        }
    }
}

/// Wait one poll interval. Returns true if shutdown arrived meanwhile.
async fn idle(shutdown: &mut broadcast::Receiver<()>, config: &QueueConfig) -> bool {
    tokio::select! {
        _ = shutdown.recv() => true,
        _ = time::sleep(config.poll_interval()) => false,
    }
}
