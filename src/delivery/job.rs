//! Delivery jobs and per-attempt results.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{DeliveryError, QueueError};

/// What an event source hands to `enqueue`.
#[derive(Clone, Deserialize, Serialize)]
pub struct NewDelivery {
    pub webhook_id: String,
    pub url: String,
    pub secret: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl fmt::Debug for NewDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewDelivery")
            .field("webhook_id", &self.webhook_id)
            .field("url", &self.url)
            .field("secret", &"<redacted>")
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

/// The unit of work owned by the queue.
#[derive(Clone, PartialEq, Deserialize, Serialize)]
pub struct DeliveryJob {
    pub delivery_id: Uuid,
    pub webhook_id: String,
    pub url: String,
    pub secret: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    /// Attempts started so far, including the one in progress.
    pub attempt_count: u32,
}

impl fmt::Debug for DeliveryJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryJob")
            .field("delivery_id", &self.delivery_id)
            .field("webhook_id", &self.webhook_id)
            .field("url", &self.url)
            .field("secret", &"<redacted>")
            .field("event_type", &self.event_type)
            .field("attempt_count", &self.attempt_count)
            .finish_non_exhaustive()
    }
}

impl DeliveryJob {
    /// Validate `new` and assign a fresh delivery id.
    pub fn new(new: NewDelivery) -> Result<Self, QueueError> {
        if new.webhook_id.trim().is_empty() {
            return Err(QueueError::InvalidJob("webhook_id must not be empty".into()));
        }
        if new.event_type.trim().is_empty() {
            return Err(QueueError::InvalidJob("event_type must not be empty".into()));
        }

        let url = Url::parse(&new.url)
            .map_err(|e| QueueError::InvalidJob(format!("invalid url '{}': {e}", new.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(QueueError::InvalidJob(format!(
                "unsupported url scheme '{}'",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(QueueError::InvalidJob(format!("url '{}' has no host", new.url)));
        }

        Ok(Self {
            delivery_id: Uuid::new_v4(),
            webhook_id: new.webhook_id,
            url: new.url,
            secret: new.secret,
            event_type: new.event_type,
            payload: new.payload,
            attempt_count: 0,
        })
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WebhookDeliveryResult {
    pub success: bool,
    pub attempt: u32,
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl WebhookDeliveryResult {
    pub fn delivered(attempt: u32, status_code: u16, response_body: String, duration_ms: u64) -> Self {
        Self {
            success: true,
            attempt,
            status_code: Some(status_code),
            response_body: Some(response_body),
            error: None,
            delivered_at: Some(Utc::now()),
            duration_ms,
        }
    }

    pub fn failed(attempt: u32, error: &DeliveryError, duration_ms: u64) -> Self {
        let response_body = match error {
            DeliveryError::Http { body, .. } if !body.is_empty() => Some(body.clone()),
            _ => None,
        };

        Self {
            success: false,
            attempt,
            status_code: error.status_code(),
            response_body,
            error: Some(error.to_string()),
            delivered_at: None,
            duration_ms,
        }
    }
}

/// First `max_chars` characters of `text`, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
