//! Signs and sends a single delivery attempt.
//!
//! # Responsibilities
//! - Serialize the payload once and sign exactly those bytes
//! - POST with the webhook headers under a hard timeout
//! - Classify the response into a result or a `DeliveryError`
//!
//! # Design Decisions
//! - No internal retries; the queue owns rescheduling
//! - No per-attempt mutable state, so one processor serves every worker task
//! - Redirects are not followed
//! - One breaker per target (`<family>:<host>:<port>`), so a failing
//!   subscriber never fails fast for the others
//! - Response bodies are read only up to what the result keeps

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;

use crate::config::DeliveryConfig;
use crate::delivery::job::{truncate_chars, DeliveryJob, WebhookDeliveryResult};
use crate::delivery::signer::sign;
use crate::error::DeliveryError;
use crate::health::HealthCheck;
use crate::queue::JobProcessor;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry};
use crate::resilience::timeouts::with_deadline;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
pub const WEBHOOK_ID_HEADER: &str = "X-Webhook-ID";
pub const DELIVERY_ID_HEADER: &str = "X-Webhook-Delivery";

pub struct WebhookProcessor {
    client: reqwest::Client,
    config: DeliveryConfig,
    breakers: Option<(Arc<CircuitBreakerRegistry>, String)>,
}

impl WebhookProcessor {
    pub fn new(config: DeliveryConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            config,
            breakers: None,
        })
    }

    /// Route each send through the `family` breaker of its target in `registry`.
    pub fn with_breakers(mut self, registry: Arc<CircuitBreakerRegistry>, family: impl Into<String>) -> Self {
        self.breakers = Some((registry, family.into()));
        self
    }

    fn breaker_for(&self, job: &DeliveryJob) -> Option<Arc<CircuitBreaker>> {
        let (registry, family) = self.breakers.as_ref()?;
        Some(registry.get(&breaker_name(family, &job.url)))
    }

    async fn send(&self, job: &DeliveryJob, body: Vec<u8>, signature: String) -> Result<(u16, String), DeliveryError> {
        let timeout = self.config.timeout();
        let request = self
            .client
            .post(&job.url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(EVENT_HEADER, &job.event_type)
            .header(TIMESTAMP_HEADER, Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
            .header(WEBHOOK_ID_HEADER, &job.webhook_id)
            .header(DELIVERY_ID_HEADER, job.delivery_id.to_string())
            .body(body);

        let exchange = async {
            let response = request.send().await.map_err(|e| classify(e, timeout))?;
            let status = response.status();
            let keep = if status.is_success() {
                self.config.response_body_limit
            } else {
                self.config.error_snippet_limit
            };
            let text = read_prefix(response, keep).await.map_err(|e| classify(e, timeout))?;
            Ok::<(StatusCode, String), DeliveryError>((status, text))
        };

        let (status, text) = with_deadline(timeout, exchange)
            .await
            .map_err(|_| DeliveryError::Timeout { after: timeout })??;

        if status.is_success() {
            Ok((status.as_u16(), text))
        } else {
            Err(DeliveryError::Http {
                status: status.as_u16(),
                body: text,
            })
        }
    }
}

/// Breaker name for a target: `family:host:port`.
pub fn breaker_name(family: &str, url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => format!(
            "{family}:{}:{}",
            parsed.host_str().unwrap_or_default(),
            parsed.port_or_known_default().unwrap_or_default()
        ),
        Err(_) => family.to_string(),
    }
}

/// Read at most enough of the body to yield `chars` characters, then drop the rest.
async fn read_prefix(mut response: reqwest::Response, chars: usize) -> Result<String, reqwest::Error> {
    let max_bytes = chars.saturating_mul(4);
    let mut buf = Vec::new();
    while buf.len() < max_bytes {
        match response.chunk().await? {
            Some(chunk) => buf.extend_from_slice(&chunk),
            None => break,
        }
    }
    buf.truncate(max_bytes);
    Ok(truncate_chars(&String::from_utf8_lossy(&buf), chars))
}

fn classify(err: reqwest::Error, timeout: std::time::Duration) -> DeliveryError {
    if err.is_timeout() {
        DeliveryError::Timeout { after: timeout }
    } else {
        DeliveryError::Transport(err.to_string())
    }
}

#[async_trait]
impl JobProcessor for WebhookProcessor {
    async fn process(&self, job: &DeliveryJob) -> Result<WebhookDeliveryResult, DeliveryError> {
        let attempt = job.attempt_count;
        let body = serde_json::to_vec(&job.payload).map_err(|e| DeliveryError::Serialization(e.to_string()))?;
        let signature = sign(&job.secret, &body);

        let started = Instant::now();
        let outcome = match self.breaker_for(job) {
            Some(breaker) => breaker
                .execute(|| self.send(job, body, signature))
                .await
                .map_err(DeliveryError::from),
            None => self.send(job, body, signature).await,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((status, response_body)) => {
                tracing::debug!(delivery_id = %job.delivery_id, attempt, status, duration_ms, "Webhook accepted");
                Ok(WebhookDeliveryResult::delivered(attempt, status, response_body, duration_ms))
            }
            Err(error) => {
                tracing::warn!(
                    delivery_id = %job.delivery_id,
                    webhook_id = %job.webhook_id,
                    attempt,
                    kind = error.kind(),
                    client_error = error.is_client_error(),
                    error = %error,
                    "Webhook attempt failed"
                );
                Err(error)
            }
        }
    }
}

#[async_trait]
impl HealthCheck for WebhookProcessor {
    fn component(&self) -> &str {
        "webhook-processor"
    }
}
