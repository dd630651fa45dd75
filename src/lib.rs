//! Resilient asynchronous webhook delivery.
//!
//! Jobs enter through [`queue::WebhookQueue::enqueue`], are leased by a
//! bounded worker pool and handed to [`delivery::WebhookProcessor`], which
//! signs the payload and POSTs it through a circuit breaker. Failures are
//! rescheduled with exponential backoff until attempts run out.

pub mod admin;
pub mod config;
pub mod delivery;
pub mod error;
pub mod events;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod queue;
pub mod resilience;

pub use config::DispatchConfig;
pub use delivery::{DeliveryJob, NewDelivery, WebhookDeliveryResult, WebhookProcessor};
pub use error::{CallError, DeliveryError, QueueError, RetryError};
pub use lifecycle::{Dispatcher, Shutdown};
pub use queue::{JobProcessor, JobStore, MemoryJobStore, WebhookQueue};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use resilience::retries::{with_retry, with_retry_detailed, RetryPolicy};
