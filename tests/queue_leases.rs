//! Queue ownership, concurrency and shutdown behaviour.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use webhook_dispatch::delivery::{NewDelivery, WebhookProcessor};
use webhook_dispatch::error::QueueError;
use webhook_dispatch::events::{DispatchEvent, EventBus};
use webhook_dispatch::queue::{JobState, JobStore, MemoryJobStore, WebhookQueue};

mod common;

fn delivery(webhook_id: &str, url: String) -> NewDelivery {
    NewDelivery {
        webhook_id: webhook_id.into(),
        url,
        secret: "s3cret".into(),
        event_type: "order.paid".into(),
        payload: json!({"order": webhook_id}),
    }
}

fn processor() -> Arc<WebhookProcessor> {
    Arc::new(WebhookProcessor::new(common::fast_config().delivery).unwrap())
}

#[tokio::test]
async fn test_each_job_delivered_once_within_concurrency_limit() {
    let backend = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        (200, "ok".to_string())
    })
    .await;

    let mut config = common::fast_config();
    config.queue.concurrency = 4;
    let store = Arc::new(MemoryJobStore::new());
    let queue = WebhookQueue::new(store, config.queue, config.retention, EventBus::default());
    queue.start_worker(processor()).unwrap();

    let mut ids = Vec::new();
    for i in 0..30 {
        ids.push(queue.enqueue(delivery(&format!("wh_{i}"), backend.url())).await.unwrap());
    }
    for id in &ids {
        let record = common::wait_for_terminal(&queue, *id).await;
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.attempts.len(), 1);
    }

    let mut per_delivery: HashMap<String, usize> = HashMap::new();
    for request in backend.requests() {
        *per_delivery
            .entry(request.header("x-webhook-delivery").unwrap().to_string())
            .or_default() += 1;
    }
    assert_eq!(per_delivery.len(), 30);
    assert!(per_delivery.values().all(|&n| n == 1));
    assert!(backend.peak_in_flight() <= 4, "peak {}", backend.peak_in_flight());

    queue.close().await.unwrap();
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed_by_worker() {
    let backend = common::start_mock_backend(200, "ok").await;
    let config = common::fast_config();
    let store = Arc::new(MemoryJobStore::new());
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let queue = WebhookQueue::new(store.clone(), config.queue, config.retention, events);

    let id = queue.enqueue(delivery("wh_1", backend.url())).await.unwrap();

    // A worker that claims and then disappears.
    let crashed = store
        .claim(Utc::now(), Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(crashed.job.delivery_id, id);

    queue.start_worker(processor()).unwrap();
    let record = common::wait_for_terminal(&queue, id).await;

    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.job.attempt_count, 2);
    assert_eq!(record.attempts.len(), 2);
    assert_eq!(record.attempts[0].attempt, 1);
    assert!(!record.attempts[0].success);
    assert!(record.attempts[0].error.as_deref().unwrap().contains("timed out"));
    assert_eq!(record.attempts[1].attempt, 2);
    assert!(record.attempts[1].success);
    assert_eq!(backend.hits(), 1);

    let late = store
        .complete(id, crashed.lease_token, record.attempts[0].clone(), Utc::now())
        .await;
    assert!(matches!(late, Err(QueueError::LeaseLost(_))));

    let mut saw_expiry = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, DispatchEvent::LeaseExpired { delivery_id, .. } if delivery_id == id) {
            saw_expiry = true;
        }
    }
    assert!(saw_expiry);

    queue.close().await.unwrap();
}

#[tokio::test]
async fn test_reclaimed_job_past_max_attempts_is_failed() {
    let backend = common::start_mock_backend(200, "ok").await;
    let mut config = common::fast_config();
    config.queue.max_attempts = 1;
    let store = Arc::new(MemoryJobStore::new());
    let queue = WebhookQueue::new(store.clone(), config.queue, config.retention, EventBus::default());

    let id = queue.enqueue(delivery("wh_1", backend.url())).await.unwrap();
    store
        .claim(Utc::now(), Duration::from_millis(20))
        .await
        .unwrap()
        .unwrap();

    queue.start_worker(processor()).unwrap();
    let record = common::wait_for_terminal(&queue, id).await;

    assert_eq!(record.state, JobState::Failed);
    assert_eq!(backend.hits(), 0);
    assert_eq!(record.attempts.len(), 1);
    assert_eq!(record.attempts[0].attempt, 1);
    assert!(record.attempts[0].error.as_deref().unwrap().contains("timed out"));

    queue.close().await.unwrap();
}

#[tokio::test]
async fn test_close_waits_for_in_flight_delivery() {
    let backend = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        (200, "ok".to_string())
    })
    .await;
    let config = common::fast_config();
    let queue = WebhookQueue::new(
        Arc::new(MemoryJobStore::new()),
        config.queue,
        config.retention,
        EventBus::default(),
    );
    queue.start_worker(processor()).unwrap();

    let id = queue.enqueue(delivery("wh_1", backend.url())).await.unwrap();
    common::wait_for_state(&queue, id, |s| s == JobState::Active).await;

    queue.close().await.unwrap();

    let record = queue.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert!(matches!(
        queue.enqueue(delivery("wh_2", backend.url())).await,
        Err(QueueError::Closed)
    ));
}

#[tokio::test]
async fn test_close_releases_jobs_that_miss_the_drain_deadline() {
    let backend = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(4)).await;
        (200, "ok".to_string())
    })
    .await;
    let mut config = common::fast_config();
    config.queue.drain_timeout_secs = 1;
    let queue = WebhookQueue::new(
        Arc::new(MemoryJobStore::new()),
        config.queue,
        config.retention,
        EventBus::default(),
    );
    queue.start_worker(processor()).unwrap();

    let id = queue.enqueue(delivery("wh_1", backend.url())).await.unwrap();
    common::wait_for_state(&queue, id, |s| s == JobState::Active).await;

    queue.close().await.unwrap();

    let record = queue.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Waiting);
    assert_eq!(record.job.attempt_count, 0);
    assert!(record.lease.is_none());
}

#[tokio::test]
async fn test_close_flushes_snapshot_for_next_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.json");
    let config = common::fast_config();

    let queue = WebhookQueue::new(
        Arc::new(MemoryJobStore::open(&path).unwrap()),
        config.queue.clone(),
        config.retention.clone(),
        EventBus::default(),
    );
    let id = queue
        .enqueue(delivery("wh_1", "http://127.0.0.1:9/hook".into()))
        .await
        .unwrap();
    queue.close().await.unwrap();

    let reopened = MemoryJobStore::open(&path).unwrap();
    let record = reopened.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Waiting);
    assert_eq!(record.job.webhook_id, "wh_1");
}

#[tokio::test]
async fn test_enqueued_job_survives_a_crash_without_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.json");
    let config = common::fast_config();

    let queue = WebhookQueue::new(
        Arc::new(MemoryJobStore::open(&path).unwrap()),
        config.queue.clone(),
        config.retention.clone(),
        EventBus::default(),
    );
    let id = queue
        .enqueue(delivery("wh_1", "http://127.0.0.1:9/hook".into()))
        .await
        .unwrap();
    drop(queue);

    let reopened = MemoryJobStore::open(&path).unwrap();
    let record = reopened.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Waiting);
    assert_eq!(record.job.webhook_id, "wh_1");
}

#[tokio::test]
async fn test_completed_delivery_is_on_disk_before_close() {
    let backend = common::start_mock_backend(200, "ok").await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.json");
    let config = common::fast_config();

    let queue = WebhookQueue::new(
        Arc::new(MemoryJobStore::open(&path).unwrap()),
        config.queue,
        config.retention,
        EventBus::default(),
    );
    queue.start_worker(processor()).unwrap();
    let id = queue.enqueue(delivery("wh_1", backend.url())).await.unwrap();
    common::wait_for_terminal(&queue, id).await;

    let reopened = MemoryJobStore::open(&path).unwrap();
    let record = reopened.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.attempts.len(), 1);

    queue.close().await.unwrap();
}
