//! End-to-end delivery tests against a mock subscriber.

use std::time::Duration;

use serde_json::json;
use webhook_dispatch::config::DispatchConfig;
use webhook_dispatch::delivery::{breaker_name, signer, DeliveryJob, NewDelivery, WebhookProcessor};
use webhook_dispatch::error::DeliveryError;
use webhook_dispatch::lifecycle::Dispatcher;
use webhook_dispatch::queue::{JobProcessor, JobState};
use webhook_dispatch::resilience::circuit_breaker::CircuitState;

mod common;

fn delivery(url: String) -> NewDelivery {
    NewDelivery {
        webhook_id: "wh_123".into(),
        url,
        secret: "s3cret".into(),
        event_type: "user.created".into(),
        payload: json!({"a": 1}),
    }
}

async fn start(config: DispatchConfig) -> Dispatcher {
    Dispatcher::start(config).await.unwrap()
}

#[tokio::test]
async fn test_signed_request_carries_all_headers() {
    let long_body: &'static str = Box::leak("x".repeat(1500).into_boxed_str());
    let backend = common::start_mock_backend(200, long_body).await;
    let dispatcher = start(common::fast_config()).await;

    let id = dispatcher.queue().enqueue(delivery(backend.url())).await.unwrap();
    let record = common::wait_for_terminal(dispatcher.queue(), id).await;

    assert_eq!(record.state, JobState::Completed);
    let result = &record.attempts[0];
    assert!(result.success);
    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.response_body.as_ref().unwrap().len(), 1000);
    assert!(result.delivered_at.is_some());

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/hook");
    assert_eq!(request.body, br#"{"a":1}"#);
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.header("x-webhook-event"), Some("user.created"));
    assert_eq!(request.header("x-webhook-id"), Some("wh_123"));
    let delivery_header = id.to_string();
    assert_eq!(request.header("x-webhook-delivery"), Some(delivery_header.as_str()));
    assert!(request.header("user-agent").unwrap().starts_with("webhook-dispatch/"));

    let timestamp = request.header("x-webhook-timestamp").unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());

    let signature = request.header("x-webhook-signature").unwrap();
    assert_eq!(signature, signer::sign("s3cret", &request.body));
    assert!(signer::verify("s3cret", &request.body, signature));
    assert!(!signer::verify("s3cret!", &request.body, signature));

    dispatcher.close().await.unwrap();
}

#[tokio::test]
async fn test_four_failures_then_success_takes_five_attempts() {
    let backend = common::start_programmable_backend(|call| async move {
        if call < 4 {
            (503, "busy".to_string())
        } else {
            (200, "ok".to_string())
        }
    })
    .await;
    let dispatcher = start(common::fast_config()).await;

    let id = dispatcher.queue().enqueue(delivery(backend.url())).await.unwrap();
    let record = common::wait_for_terminal(dispatcher.queue(), id).await;

    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.attempts.len(), 5);
    assert_eq!(backend.hits(), 5);
    for (i, attempt) in record.attempts.iter().enumerate() {
        assert_eq!(attempt.attempt, i as u32 + 1);
    }
    assert!(record.attempts[..4].iter().all(|a| !a.success && a.status_code == Some(503)));
    assert!(record.attempts[4].success);

    // Every retry carries the same delivery id and body.
    let requests = backend.requests();
    assert!(requests.iter().all(|r| r.header("x-webhook-delivery") == Some(id.to_string().as_str())));
    assert!(requests.iter().all(|r| r.body == requests[0].body));

    dispatcher.close().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_job_is_retained_as_failed() {
    let long_error: &'static str = Box::leak("e".repeat(500).into_boxed_str());
    let backend = common::start_mock_backend(500, long_error).await;
    let dispatcher = start(common::fast_config()).await;

    let id = dispatcher.queue().enqueue(delivery(backend.url())).await.unwrap();
    let record = common::wait_for_terminal(dispatcher.queue(), id).await;

    assert_eq!(record.state, JobState::Failed);
    assert_eq!(record.attempts.len(), 5);
    assert!(record.finished_at.is_some());
    let last = record.attempts.last().unwrap();
    assert_eq!(last.status_code, Some(500));
    assert_eq!(last.response_body.as_ref().unwrap().len(), 200);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.hits(), 5);
    let counts = dispatcher.queue().metrics().await.unwrap();
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.waiting + counts.delayed + counts.active, 0);

    dispatcher.close().await.unwrap();
}

#[tokio::test]
async fn test_client_errors_are_retried() {
    let backend = common::start_mock_backend(404, "gone").await;
    let mut config = common::fast_config();
    config.queue.max_attempts = 3;
    let dispatcher = start(config).await;

    let id = dispatcher.queue().enqueue(delivery(backend.url())).await.unwrap();
    let record = common::wait_for_terminal(dispatcher.queue(), id).await;

    assert_eq!(record.state, JobState::Failed);
    assert_eq!(backend.hits(), 3);

    dispatcher.close().await.unwrap();
}

#[tokio::test]
async fn test_open_breaker_stops_calling_subscriber() {
    let backend = common::start_mock_backend(500, "down").await;
    let mut config = common::fast_config();
    config.breaker.failure_threshold = 2;
    config.breaker.reset_timeout_ms = 60_000;
    let dispatcher = start(config).await;

    let id = dispatcher.queue().enqueue(delivery(backend.url())).await.unwrap();
    let record = common::wait_for_terminal(dispatcher.queue(), id).await;

    assert_eq!(record.state, JobState::Failed);
    assert_eq!(record.attempts.len(), 5);
    assert_eq!(backend.hits(), 2);
    assert!(record.attempts[2..]
        .iter()
        .all(|a| a.error.as_deref().unwrap_or_default().contains("is open")));

    let breakers = dispatcher.breakers().metrics();
    assert_eq!(breakers.len(), 1);
    assert_eq!(breakers[0].name, breaker_name("webhook-delivery", &backend.url()));
    assert_eq!(breakers[0].state, CircuitState::Open);
    assert_eq!(breakers[0].rejected_calls, 3);
    assert!(dispatcher.health().await.degraded);

    dispatcher.close().await.unwrap();
}

#[tokio::test]
async fn test_broken_subscriber_does_not_fail_others() {
    let broken = common::start_mock_backend(500, "down").await;
    let healthy = common::start_mock_backend(200, "ok").await;
    let mut config = common::fast_config();
    config.breaker.failure_threshold = 2;
    config.breaker.reset_timeout_ms = 60_000;
    let dispatcher = start(config).await;

    let broken_id = dispatcher.queue().enqueue(delivery(broken.url())).await.unwrap();
    let broken_record = common::wait_for_terminal(dispatcher.queue(), broken_id).await;
    assert_eq!(broken_record.state, JobState::Failed);
    assert_eq!(broken.hits(), 2);

    let healthy_id = dispatcher.queue().enqueue(delivery(healthy.url())).await.unwrap();
    let healthy_record = common::wait_for_terminal(dispatcher.queue(), healthy_id).await;
    assert_eq!(healthy_record.state, JobState::Completed);
    assert_eq!(healthy_record.attempts.len(), 1);
    assert_eq!(healthy.hits(), 1);

    let states: Vec<(String, CircuitState)> = dispatcher
        .breakers()
        .metrics()
        .into_iter()
        .map(|m| (m.name, m.state))
        .collect();
    assert!(states.contains(&(breaker_name("webhook-delivery", &broken.url()), CircuitState::Open)));
    assert!(states.contains(&(breaker_name("webhook-delivery", &healthy.url()), CircuitState::Closed)));

    dispatcher.close().await.unwrap();
}

#[tokio::test]
async fn test_slow_subscriber_times_out() {
    let backend = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        (200, "late".to_string())
    })
    .await;

    let mut config = DispatchConfig::default();
    config.delivery.timeout_secs = 1;
    let processor = WebhookProcessor::new(config.delivery).unwrap();

    let mut job = DeliveryJob::new(delivery(backend.url())).unwrap();
    job.attempt_count = 1;
    let err = processor.process(&job).await.unwrap_err();
    assert!(matches!(err, DeliveryError::Timeout { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_processing_twice_yields_independent_results() {
    let backend = common::start_mock_backend(200, "ok").await;
    let processor = WebhookProcessor::new(DispatchConfig::default().delivery).unwrap();

    let mut job = DeliveryJob::new(delivery(backend.url())).unwrap();
    job.attempt_count = 1;

    let first = processor.process(&job).await.unwrap();
    let second = processor.process(&job).await.unwrap();

    assert!(first.success && second.success);
    assert_eq!(backend.hits(), 2);
    let requests = backend.requests();
    assert_eq!(requests[0].body, requests[1].body);
    assert_eq!(
        requests[0].header("x-webhook-signature"),
        requests[1].header("x-webhook-signature")
    );
}
