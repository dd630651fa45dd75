//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failure is retryable (caller-supplied predicate)
//! - Execute retries with exponential backoff + optional jitter
//! - Report every attempt for callers that need an audit trail
//!
//! # Design Decisions
//! - Attempts are numbered from 1; `max_attempts` includes the first call
//! - The final error is surfaced unchanged, with the attempt count attached
//! - Presets differ only in numbers, never in behaviour

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::RetryError;
use crate::resilience::backoff::{apply_jitter, exponential_delay};

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Retry configuration for one class of dependency.
pub struct RetryPolicy<E> {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    retryable: Predicate<E>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
            retryable: self.retryable.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E> {
    /// Policy with `max_attempts` and the generic external-service timings.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
            backoff_multiplier: 2.0,
            jitter: true,
            retryable: Arc::new(|_| true),
        }
    }

    /// Short, tight retries for a primary data store.
    pub fn database() -> Self {
        Self::new(3)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(2_000))
    }

    /// Very short retries for a cache; callers fall through quickly.
    pub fn cache() -> Self {
        Self::new(2)
            .with_base_delay(Duration::from_millis(50))
            .with_max_delay(Duration::from_millis(500))
    }

    /// Patient retries for third-party HTTP services.
    pub fn external_service() -> Self {
        Self::new(5)
            .with_base_delay(Duration::from_millis(1_000))
            .with_max_delay(Duration::from_millis(60_000))
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Only errors matching `predicate` are retried.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    pub fn is_retryable(&self, error: &E) -> bool {
        (self.retryable)(error)
    }

    /// Pre-jitter delay scheduled after a failed `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        exponential_delay(attempt, self.base_delay, self.backoff_multiplier, self.max_delay)
    }

    fn sleep_for(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter {
            apply_jitter(delay, self.max_delay)
        } else {
            delay
        }
    }
}

/// What happened on one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed { error: String, retryable: bool },
}

/// One entry in a detailed retry report.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
    /// Delay slept before the next attempt, if one followed.
    pub delay: Option<Duration>,
}

/// Final result plus every attempt that led to it.
#[derive(Debug)]
pub struct RetryReport<T, E: std::error::Error + 'static> {
    pub result: Result<T, RetryError<E>>,
    pub attempts: Vec<AttemptRecord>,
}

/// Run `operation` under `policy`, returning only the final outcome.
pub async fn with_retry<T, E, F, Fut>(operation: F, policy: &RetryPolicy<E>) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_detailed(operation, policy).await.result
}

/// Run `operation` under `policy`, recording each attempt.
pub async fn with_retry_detailed<T, E, F, Fut>(mut operation: F, policy: &RetryPolicy<E>) -> RetryReport<T, E>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = Vec::new();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let started = Instant::now();

        match operation().await {
            Ok(value) => {
                attempts.push(AttemptRecord {
                    attempt,
                    outcome: AttemptOutcome::Succeeded,
                    elapsed: started.elapsed(),
                    delay: None,
                });
                return RetryReport { result: Ok(value), attempts };
            }
            Err(error) => {
                let retryable = policy.is_retryable(&error);
                let exhausted = attempt >= policy.max_attempts;
                let mut record = AttemptRecord {
                    attempt,
                    outcome: AttemptOutcome::Failed { error: error.to_string(), retryable },
                    elapsed: started.elapsed(),
                    delay: None,
                };

                if !retryable || exhausted {
                    tracing::debug!(
                        attempt,
                        retryable,
                        error = %error,
                        "Giving up on operation"
                    );
                    attempts.push(record);
                    return RetryReport {
                        result: Err(RetryError { attempts: attempt, source: error }),
                        attempts,
                    };
                }

                let delay = policy.sleep_for(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay = ?delay,
                    error = %error,
                    "Operation failed, retrying"
                );
                record.delay = Some(delay);
                attempts.push(record);

                tokio::time::sleep(delay).await;
            }
        }
    }
}
