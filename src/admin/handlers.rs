use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RetentionConfig;
use crate::delivery::{NewDelivery, WebhookDeliveryResult};
use crate::error::QueueError;
use crate::health::HealthReport;
use crate::lifecycle::Dispatcher;
use crate::queue::{JobRecord, JobState, QueueMetrics};
use crate::resilience::circuit_breaker::BreakerMetrics;

const DEFAULT_PAGE: usize = 20;
const MAX_PAGE: usize = 100;

/// Queue errors as HTTP responses.
pub struct ApiError(QueueError);

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            QueueError::InvalidJob(_) => StatusCode::UNPROCESSABLE_ENTITY,
            QueueError::NotFound(_) => StatusCode::NOT_FOUND,
            QueueError::LeaseLost(_) => StatusCode::CONFLICT,
            QueueError::Closed | QueueError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub queue: QueueMetrics,
}

#[derive(Serialize)]
pub struct QueueStatus {
    pub accepting: bool,
    pub jobs: QueueMetrics,
    pub retention: RetentionConfig,
}

/// A stored delivery as exposed over the API. The signing secret is omitted.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryView {
    pub delivery_id: Uuid,
    pub webhook_id: String,
    pub url: String,
    pub event_type: String,
    pub state: JobState,
    pub attempt_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub run_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: Vec<WebhookDeliveryResult>,
}

impl From<JobRecord> for DeliveryView {
    fn from(record: JobRecord) -> Self {
        Self {
            delivery_id: record.job.delivery_id,
            webhook_id: record.job.webhook_id,
            url: record.job.url,
            event_type: record.job.event_type,
            state: record.state,
            attempt_count: record.job.attempt_count,
            enqueued_at: record.enqueued_at,
            run_at: record.run_at,
            finished_at: record.finished_at,
            attempts: record.attempts,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Serialize, Deserialize)]
pub struct Enqueued {
    pub delivery_id: Uuid,
}

pub async fn get_status(State(dispatcher): State<Arc<Dispatcher>>) -> Result<Json<SystemStatus>, ApiError> {
    let queue = dispatcher.queue();
    let started_at = dispatcher.started_at();

    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if queue.is_accepting() { "operational" } else { "closing" },
        started_at,
        uptime_secs: (Utc::now() - started_at).num_seconds(),
        queue: queue.metrics().await?,
    }))
}

pub async fn get_health(State(dispatcher): State<Arc<Dispatcher>>) -> (StatusCode, Json<HealthReport>) {
    let report = dispatcher.health().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub async fn get_queue(State(dispatcher): State<Arc<Dispatcher>>) -> Result<Json<QueueStatus>, ApiError> {
    let queue = dispatcher.queue();
    Ok(Json(QueueStatus {
        accepting: queue.is_accepting(),
        jobs: queue.metrics().await?,
        retention: queue.retention(),
    }))
}

pub async fn get_breakers(State(dispatcher): State<Arc<Dispatcher>>) -> Json<Vec<BreakerMetrics>> {
    Json(dispatcher.breakers().metrics())
}

pub async fn get_delivery(
    State(dispatcher): State<Arc<Dispatcher>>,
    Path(delivery_id): Path<Uuid>,
) -> Result<Json<DeliveryView>, ApiError> {
    let record = dispatcher
        .queue()
        .get(delivery_id)
        .await?
        .ok_or(QueueError::NotFound(delivery_id))?;
    Ok(Json(record.into()))
}

pub async fn get_webhook_history(
    State(dispatcher): State<Arc<Dispatcher>>,
    Path(webhook_id): Path<String>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<DeliveryView>>, ApiError> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let records = dispatcher.queue().history(&webhook_id, page.offset, limit).await?;
    Ok(Json(records.into_iter().map(DeliveryView::from).collect()))
}

pub async fn post_delivery(
    State(dispatcher): State<Arc<Dispatcher>>,
    Json(delivery): Json<NewDelivery>,
) -> Result<(StatusCode, Json<Enqueued>), ApiError> {
    let delivery_id = dispatcher.queue().enqueue(delivery).await?;
    Ok((StatusCode::ACCEPTED, Json(Enqueued { delivery_id })))
}
