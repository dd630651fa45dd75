//! In-process job store with optional JSON snapshot persistence.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::RetentionConfig;
use crate::delivery::{DeliveryJob, WebhookDeliveryResult};
use crate::error::{QueueError, QueueResult};
use crate::queue::store::{ClaimedJob, JobRecord, JobState, JobStore, Lease, QueueMetrics};

/// A mutex-guarded map of jobs.
///
/// With a snapshot path, the store is loaded from disk on open and rewritten
/// after every mutation, before the mutation is acknowledged. Leases survive a
/// restart: jobs that were active become claimable once their lease expires.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: Mutex<HashMap<Uuid, JobRecord>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by `path`, loading it if the file exists.
    pub fn open(path: impl AsRef<Path>) -> QueueResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut records = HashMap::new();

        if path.exists() {
            let file = File::open(&path).map_err(|e| unavailable(&path, e))?;
            let loaded: Vec<JobRecord> =
                serde_json::from_reader(BufReader::new(file)).map_err(|e| unavailable(&path, e))?;
            for record in loaded {
                records.insert(record.job.delivery_id, record);
            }
            tracing::info!(path = %path.display(), jobs = records.len(), "Loaded job snapshot");
        }

        Ok(Self {
            records: Mutex::new(records),
            snapshot_path: Some(path),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, JobRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_leased<F>(&self, delivery_id: Uuid, token: Uuid, f: F) -> QueueResult<()>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut records = self.lock();
        let record = records
            .get_mut(&delivery_id)
            .ok_or(QueueError::NotFound(delivery_id))?;
        if !record.holds_lease(token) {
            return Err(QueueError::LeaseLost(delivery_id));
        }
        f(record);
        self.persist(&records)
    }

    /// Write `records` to the snapshot file via a temp file and rename.
    /// Called with the lock held so snapshots are written in mutation order.
    fn persist(&self, records: &HashMap<Uuid, JobRecord>) -> QueueResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let snapshot: Vec<&JobRecord> = records.values().collect();
        let tmp = path.with_extension("tmp");
        {
            let file = File::create(&tmp).map_err(|e| unavailable(&tmp, e))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &snapshot).map_err(|e| unavailable(&tmp, e))?;
            writer
                .into_inner()
                .map_err(|e| unavailable(&tmp, e.error()))?
                .sync_all()
                .map_err(|e| unavailable(&tmp, e))?;
        }
        fs::rename(&tmp, path).map_err(|e| unavailable(path, e))?;

        tracing::trace!(path = %path.display(), jobs = snapshot.len(), "Saved job snapshot");
        Ok(())
    }
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> QueueError {
    QueueError::Unavailable(format!("{}: {err}", path.display()))
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn push(&self, job: DeliveryJob, now: DateTime<Utc>) -> QueueResult<()> {
        let mut records = self.lock();
        if records.contains_key(&job.delivery_id) {
            return Err(QueueError::InvalidJob(format!(
                "delivery {} already enqueued",
                job.delivery_id
            )));
        }
        let delivery_id = job.delivery_id;
        records.insert(delivery_id, JobRecord::new(job, now));
        if let Err(e) = self.persist(&records) {
            // Not acknowledged, so not kept.
            records.remove(&delivery_id);
            return Err(e);
        }
        Ok(())
    }

    async fn claim(&self, now: DateTime<Utc>, lease: Duration) -> QueueResult<Option<ClaimedJob>> {
        let mut records = self.lock();

        let next = records
            .values()
            .filter(|r| r.is_claimable(now))
            .min_by_key(|r| (r.run_at, r.enqueued_at))
            .map(|r| r.job.delivery_id);

        let Some(delivery_id) = next else {
            return Ok(None);
        };
        let Some(record) = records.get_mut(&delivery_id) else {
            return Ok(None);
        };

        let reclaimed = record.state == JobState::Active;
        let token = Uuid::new_v4();
        record.state = JobState::Active;
        record.lease = Some(Lease {
            token,
            expires_at: now.checked_add_signed(to_chrono(lease)).unwrap_or(DateTime::<Utc>::MAX_UTC),
        });
        record.job.attempt_count += 1;
        let claimed = ClaimedJob {
            job: record.job.clone(),
            lease_token: token,
            reclaimed,
        };

        // If this write fails the lease stays in memory and simply expires.
        self.persist(&records)?;
        Ok(Some(claimed))
    }

    async fn complete(
        &self,
        delivery_id: Uuid,
        token: Uuid,
        result: WebhookDeliveryResult,
        now: DateTime<Utc>,
    ) -> QueueResult<()> {
        self.with_leased(delivery_id, token, |record| {
            record.state = JobState::Completed;
            record.lease = None;
            record.finished_at = Some(now);
            record.attempts.push(result);
        })
    }

    async fn fail(
        &self,
        delivery_id: Uuid,
        token: Uuid,
        result: WebhookDeliveryResult,
        retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> QueueResult<()> {
        self.with_leased(delivery_id, token, |record| {
            record.lease = None;
            record.attempts.push(result);
            match retry_at {
                Some(at) => {
                    record.state = JobState::Delayed;
                    record.run_at = at;
                }
                None => {
                    record.state = JobState::Failed;
                    record.finished_at = Some(now);
                }
            }
        })
    }

    async fn record_attempt(&self, delivery_id: Uuid, token: Uuid, result: WebhookDeliveryResult) -> QueueResult<()> {
        self.with_leased(delivery_id, token, |record| record.attempts.push(result))
    }

    async fn release(&self, delivery_id: Uuid, token: Uuid, now: DateTime<Utc>) -> QueueResult<()> {
        self.with_leased(delivery_id, token, |record| {
            record.state = JobState::Waiting;
            record.lease = None;
            record.run_at = now;
            record.job.attempt_count = record.job.attempt_count.saturating_sub(1);
        })
    }

    async fn counts(&self, now: DateTime<Utc>) -> QueueResult<QueueMetrics> {
        let records = self.lock();
        let mut metrics = QueueMetrics::default();
        for record in records.values() {
            metrics.add(record.bucket(now));
        }
        Ok(metrics)
    }

    async fn get(&self, delivery_id: Uuid) -> QueueResult<Option<JobRecord>> {
        Ok(self.lock().get(&delivery_id).cloned())
    }

    async fn history(&self, webhook_id: &str, offset: usize, limit: usize) -> QueueResult<Vec<JobRecord>> {
        let records = self.lock();
        let mut matching: Vec<&JobRecord> = records
            .values()
            .filter(|r| r.job.webhook_id == webhook_id)
            .collect();
        matching.sort_by(|a, b| b.enqueued_at.cmp(&a.enqueued_at));

        Ok(matching.into_iter().skip(offset).take(limit).cloned().collect())
    }

    async fn purge(&self, now: DateTime<Utc>, retention: &RetentionConfig) -> QueueResult<usize> {
        let completed_for = chrono::Duration::seconds(retention.completed_secs as i64);
        let failed_for = chrono::Duration::seconds(retention.failed_secs as i64);

        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| {
            let keep_for = match record.state {
                JobState::Completed => completed_for,
                JobState::Failed => failed_for,
                _ => return true,
            };
            record
                .finished_at
                .map_or(true, |finished| finished + keep_for > now)
        });
        let purged = before - records.len();
        if purged > 0 {
            self.persist(&records)?;
        }
        Ok(purged)
    }

    async fn flush(&self) -> QueueResult<()> {
        let records = self.lock();
        self.persist(&records)?;
        if let Some(path) = &self.snapshot_path {
            tracing::info!(path = %path.display(), jobs = records.len(), "Saved job snapshot");
        }
        Ok(())
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::NewDelivery;
    use serde_json::json;

    fn job(webhook_id: &str) -> DeliveryJob {
        DeliveryJob::new(NewDelivery {
            webhook_id: webhook_id.into(),
            url: "https://example.com/hook".into(),
            secret: "s3cret".into(),
            event_type: "user.created".into(),
            payload: json!({"a": 1}),
        })
        .unwrap()
    }

    fn ok_result(attempt: u32) -> WebhookDeliveryResult {
        WebhookDeliveryResult::delivered(attempt, 200, "ok".into(), 5)
    }

    const LEASE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        store.push(job("wh_1"), now).await.unwrap();

        let claimed = store.claim(now, LEASE).await.unwrap().unwrap();
        assert_eq!(claimed.job.attempt_count, 1);
        assert!(!claimed.reclaimed);
        assert!(store.claim(now, LEASE).await.unwrap().is_none());

        let counts = store.counts(now).await.unwrap();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.waiting, 0);
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed_and_stale_ack_rejected() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        store.push(job("wh_1"), now).await.unwrap();

        let first = store.claim(now, LEASE).await.unwrap().unwrap();
        let later = now + chrono::Duration::seconds(61);
        let second = store.claim(later, LEASE).await.unwrap().unwrap();

        assert!(second.reclaimed);
        assert_eq!(second.job.attempt_count, 2);

        let id = first.job.delivery_id;
        let stale = store.complete(id, first.lease_token, ok_result(1), later).await;
        assert!(matches!(stale, Err(QueueError::LeaseLost(_))));

        store.complete(id, second.lease_token, ok_result(2), later).await.unwrap();
        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_delayed_job_waits_for_run_at() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        store.push(job("wh_1"), now).await.unwrap();
        let claimed = store.claim(now, LEASE).await.unwrap().unwrap();

        let retry_at = now + chrono::Duration::seconds(2);
        let err = crate::error::DeliveryError::Http { status: 500, body: String::new() };
        store
            .fail(
                claimed.job.delivery_id,
                claimed.lease_token,
                WebhookDeliveryResult::failed(1, &err, 3),
                Some(retry_at),
                now,
            )
            .await
            .unwrap();

        assert!(store.claim(now, LEASE).await.unwrap().is_none());
        assert_eq!(store.counts(now).await.unwrap().delayed, 1);
        assert_eq!(store.counts(retry_at).await.unwrap().waiting, 1);

        let again = store.claim(retry_at, LEASE).await.unwrap().unwrap();
        assert_eq!(again.job.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_release_returns_attempt() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        store.push(job("wh_1"), now).await.unwrap();
        let claimed = store.claim(now, LEASE).await.unwrap().unwrap();

        store.release(claimed.job.delivery_id, claimed.lease_token, now).await.unwrap();

        let again = store.claim(now, LEASE).await.unwrap().unwrap();
        assert_eq!(again.job.attempt_count, 1);
        assert!(!again.reclaimed);
    }

    #[tokio::test]
    async fn test_purge_honours_retention_windows() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let retention = RetentionConfig { completed_secs: 10, failed_secs: 100 };

        for webhook in ["done", "dead"] {
            store.push(job(webhook), now).await.unwrap();
        }
        while let Some(claimed) = store.claim(now, LEASE).await.unwrap() {
            let id = claimed.job.delivery_id;
            if claimed.job.webhook_id == "done" {
                store.complete(id, claimed.lease_token, ok_result(1), now).await.unwrap();
            } else {
                let err = crate::error::DeliveryError::Transport("refused".into());
                let result = WebhookDeliveryResult::failed(1, &err, 1);
                store.fail(id, claimed.lease_token, result, None, now).await.unwrap();
            }
        }

        assert_eq!(store.purge(now + chrono::Duration::seconds(11), &retention).await.unwrap(), 1);
        let counts = store.counts(now).await.unwrap();
        assert_eq!((counts.completed, counts.failed), (0, 1));

        assert_eq!(store.purge(now + chrono::Duration::seconds(101), &retention).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_paged() {
        let store = MemoryJobStore::new();
        let base = Utc::now();
        for i in 0..5 {
            store.push(job("wh_1"), base + chrono::Duration::seconds(i)).await.unwrap();
        }
        store.push(job("wh_2"), base).await.unwrap();

        let page = store.history("wh_1", 1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].enqueued_at > page[1].enqueued_at);
        assert_eq!(page[0].enqueued_at, base + chrono::Duration::seconds(3));
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let now = Utc::now();

        let store = MemoryJobStore::open(&path).unwrap();
        store.push(job("wh_1"), now).await.unwrap();
        let claimed = store.claim(now, LEASE).await.unwrap().unwrap();
        drop(store);

        let reopened = MemoryJobStore::open(&path).unwrap();
        let record = reopened.get(claimed.job.delivery_id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Active);
        assert!(reopened.claim(now, LEASE).await.unwrap().is_none());
        assert!(reopened
            .claim(now + chrono::Duration::seconds(61), LEASE)
            .await
            .unwrap()
            .unwrap()
            .reclaimed);
    }

    #[tokio::test]
    async fn test_every_acknowledgement_is_on_disk_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let now = Utc::now();

        let store = MemoryJobStore::open(&path).unwrap();
        store.push(job("wh_1"), now).await.unwrap();
        let claimed = store.claim(now, LEASE).await.unwrap().unwrap();
        let id = claimed.job.delivery_id;

        let err = crate::error::DeliveryError::Transport("reset".into());
        store
            .record_attempt(id, claimed.lease_token, WebhookDeliveryResult::failed(1, &err, 0))
            .await
            .unwrap();
        assert_eq!(MemoryJobStore::open(&path).unwrap().get(id).await.unwrap().unwrap().attempts.len(), 1);

        store.complete(id, claimed.lease_token, ok_result(1), now).await.unwrap();
        let record = MemoryJobStore::open(&path).unwrap().get(id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_push_is_rejected_when_snapshot_cannot_be_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let store = MemoryJobStore::open(&path).unwrap();
        drop(dir);

        let result = store.push(job("wh_1"), Utc::now()).await;
        assert!(matches!(result, Err(QueueError::Unavailable(_))));
        assert_eq!(store.counts(Utc::now()).await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn test_record_attempt_requires_the_lease() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        store.push(job("wh_1"), now).await.unwrap();
        let claimed = store.claim(now, LEASE).await.unwrap().unwrap();

        let err = crate::error::DeliveryError::Transport("reset".into());
        let result = WebhookDeliveryResult::failed(1, &err, 0);
        let stale = store.record_attempt(claimed.job.delivery_id, Uuid::new_v4(), result).await;
        assert!(matches!(stale, Err(QueueError::LeaseLost(_))));
    }
}
