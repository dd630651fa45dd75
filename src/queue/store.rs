//! Job store contract.
//!
//! The store is the single source of truth for job ownership. A worker owns a
//! job only while it holds the lease token returned by [`JobStore::claim`];
//! acknowledgements carrying a stale token are rejected with `LeaseLost`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::RetentionConfig;
use crate::delivery::{DeliveryJob, WebhookDeliveryResult};
use crate::error::QueueResult;

/// Lifecycle bucket of a stored job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready to run.
    Waiting,
    /// Rescheduled after a failure; runs at `run_at`.
    Delayed,
    /// Leased by a worker.
    Active,
    Completed,
    /// Permanently failed, kept for inspection.
    Failed,
}

/// Exclusive, time-bounded ownership of an active job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// A job plus its scheduling state and audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: DeliveryJob,
    pub state: JobState,
    pub enqueued_at: DateTime<Utc>,
    pub run_at: DateTime<Utc>,
    pub lease: Option<Lease>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: Vec<WebhookDeliveryResult>,
}

impl JobRecord {
    pub fn new(job: DeliveryJob, now: DateTime<Utc>) -> Self {
        Self {
            job,
            state: JobState::Waiting,
            enqueued_at: now,
            run_at: now,
            lease: None,
            finished_at: None,
            attempts: Vec::new(),
        }
    }

    /// Whether a worker may claim this record at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            JobState::Waiting | JobState::Delayed => self.run_at <= now,
            JobState::Active => self.lease_expired(now),
            JobState::Completed | JobState::Failed => false,
        }
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active
            && self.lease.as_ref().map_or(true, |lease| lease.expires_at <= now)
    }

    /// Bucket reported by queue metrics: due delayed jobs count as waiting.
    pub fn bucket(&self, now: DateTime<Utc>) -> JobState {
        match self.state {
            JobState::Delayed if self.run_at <= now => JobState::Waiting,
            state => state,
        }
    }

    pub fn holds_lease(&self, token: Uuid) -> bool {
        self.state == JobState::Active && self.lease.as_ref().is_some_and(|l| l.token == token)
    }
}

/// A job handed to a worker together with its lease.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// `attempt_count` already includes this attempt.
    pub job: DeliveryJob,
    pub lease_token: Uuid,
    /// The previous owner's lease expired without an acknowledgement.
    pub reclaimed: bool,
}

/// Counts of jobs per lifecycle bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

impl QueueMetrics {
    pub fn add(&mut self, bucket: JobState) {
        match bucket {
            JobState::Waiting => self.waiting += 1,
            JobState::Delayed => self.delayed += 1,
            JobState::Active => self.active += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
        }
    }
}

/// Durable storage for jobs. Implementations must make `claim` atomic.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn push(&self, job: DeliveryJob, now: DateTime<Utc>) -> QueueResult<()>;

    /// Lease the next due job, including jobs whose previous lease expired.
    async fn claim(&self, now: DateTime<Utc>, lease: Duration) -> QueueResult<Option<ClaimedJob>>;

    /// Record a successful attempt and mark the job completed.
    async fn complete(
        &self,
        delivery_id: Uuid,
        token: Uuid,
        result: WebhookDeliveryResult,
        now: DateTime<Utc>,
    ) -> QueueResult<()>;

    /// Record a failed attempt; reschedule at `retry_at`, or fail permanently when `None`.
    async fn fail(
        &self,
        delivery_id: Uuid,
        token: Uuid,
        result: WebhookDeliveryResult,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> QueueResult<()>;

    /// Append an attempt result to a job the caller still leases.
    async fn record_attempt(&self, delivery_id: Uuid, token: Uuid, result: WebhookDeliveryResult) -> QueueResult<()>;

    /// Give an unfinished attempt back without consuming it.
    async fn release(&self, delivery_id: Uuid, token: Uuid, now: DateTime<Utc>) -> QueueResult<()>;

    async fn counts(&self, now: DateTime<Utc>) -> QueueResult<QueueMetrics>;

    async fn get(&self, delivery_id: Uuid) -> QueueResult<Option<JobRecord>>;

    /// Jobs for one webhook, newest first.
    async fn history(&self, webhook_id: &str, offset: usize, limit: usize) -> QueueResult<Vec<JobRecord>>;

    /// Drop terminal jobs older than their retention window. Returns how many.
    async fn purge(&self, now: DateTime<Utc>, retention: &RetentionConfig) -> QueueResult<usize>;

    /// Persist buffered state. Stores that write through may treat this as a no-op.
    async fn flush(&self) -> QueueResult<()>;

    /// Cheap reachability check.
    async fn ping(&self) -> QueueResult<()>;
}
