//! Error types shared across the dispatcher.
//!
//! Each concern owns one enum:
//! - `CallError` wraps an operation guarded by a circuit breaker
//! - `RetryError` carries the final error of an exhausted retry loop
//! - `DeliveryError` classifies a failed webhook attempt
//! - `QueueError` is surfaced to callers of the job queue

use std::time::Duration;

use uuid::Uuid;

/// Outcome of a call routed through a circuit breaker.
#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    /// The breaker rejected the call without invoking the operation.
    #[error("circuit '{breaker}' is open, retry in {retry_in:?}")]
    CircuitOpen { breaker: String, retry_in: Duration },

    /// The operation exceeded the breaker's per-call timeout.
    #[error("call through circuit '{breaker}' timed out after {after:?}")]
    Timeout { breaker: String, after: Duration },

    /// The operation itself failed.
    #[error(transparent)]
    Operation(E),
}

impl<E> CallError<E> {
    /// True when the breaker refused the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen { .. })
    }

    /// Return the operation's own error, if that is what failed.
    pub fn into_operation(self) -> Option<E> {
        match self {
            CallError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

/// Final error of a retry loop, with the number of attempts consumed.
#[derive(Debug, thiserror::Error)]
#[error("failed after {attempts} attempt(s): {source}")]
pub struct RetryError<E: std::error::Error + 'static> {
    pub attempts: u32,
    #[source]
    pub source: E,
}

impl<E: std::error::Error + 'static> RetryError<E> {
    pub fn into_inner(self) -> E {
        self.source
    }
}

/// A failed webhook delivery attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("endpoint responded with HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("circuit '{breaker}' is open, retry in {retry_in:?}")]
    CircuitOpen { breaker: String, retry_in: Duration },

    #[error("failed to serialize payload: {0}")]
    Serialization(String),
}

impl DeliveryError {
    /// Status code reported by the endpoint, when one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DeliveryError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the queue should schedule another attempt.
    ///
    /// Every non-2xx response is retried, client errors included.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeliveryError::Serialization(_))
    }

    /// 4xx other than 429. Reported for observability only.
    pub fn is_client_error(&self) -> bool {
        matches!(self, DeliveryError::Http { status, .. } if (400..500).contains(status) && *status != 429)
    }

    /// Short machine-readable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::Timeout { .. } => "timeout",
            DeliveryError::Http { .. } => "http",
            DeliveryError::Transport(_) => "transport",
            DeliveryError::CircuitOpen { .. } => "circuit_open",
            DeliveryError::Serialization(_) => "serialization",
        }
    }
}

impl From<CallError<DeliveryError>> for DeliveryError {
    fn from(err: CallError<DeliveryError>) -> Self {
        match err {
            CallError::CircuitOpen { breaker, retry_in } => {
                DeliveryError::CircuitOpen { breaker, retry_in }
            }
            CallError::Timeout { after, .. } => DeliveryError::Timeout { after },
            CallError::Operation(e) => e,
        }
    }
}

/// Errors surfaced by the job queue and its store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("job store unavailable: {0}")]
    Unavailable(String),

    #[error("queue is closed")]
    Closed,

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("lease on job {0} is no longer held")]
    LeaseLost(Uuid),

    #[error("invalid job: {0}")]
    InvalidJob(String),
}

pub type QueueResult<T> = Result<T, QueueError>;
