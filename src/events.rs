//! Typed lifecycle events published on a broadcast bus.
//!
//! Producers (queue, worker, breakers) publish without knowing who listens.
//! The observability layer subscribes to turn events into log lines and
//! metrics; tests subscribe to assert on transitions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::resilience::circuit_breaker::CircuitState;

/// Something that happened to a job or a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    JobEnqueued {
        delivery_id: Uuid,
        webhook_id: String,
        event_type: String,
    },
    JobStarted {
        delivery_id: Uuid,
        webhook_id: String,
        attempt: u32,
    },
    JobSucceeded {
        delivery_id: Uuid,
        webhook_id: String,
        attempt: u32,
        status_code: Option<u16>,
        duration_ms: u64,
    },
    JobFailed {
        delivery_id: Uuid,
        webhook_id: String,
        attempt: u32,
        error: String,
        next_run_at: DateTime<Utc>,
    },
    JobExhausted {
        delivery_id: Uuid,
        webhook_id: String,
        attempts: u32,
        error: String,
    },
    LeaseExpired {
        delivery_id: Uuid,
        attempt: u32,
    },
    BreakerStateChanged {
        breaker: String,
        from: CircuitState,
        to: CircuitState,
    },
}

impl DispatchEvent {
    /// Event name used as a log and metric label.
    pub fn name(&self) -> &'static str {
        match self {
            DispatchEvent::JobEnqueued { .. } => "enqueued",
            DispatchEvent::JobStarted { .. } => "started",
            DispatchEvent::JobSucceeded { .. } => "succeeded",
            DispatchEvent::JobFailed { .. } => "failed",
            DispatchEvent::JobExhausted { .. } => "exhausted",
            DispatchEvent::LeaseExpired { .. } => "lease_expired",
            DispatchEvent::BreakerStateChanged { .. } => "breaker_state_changed",
        }
    }
}

/// Fan-out publisher for [`DispatchEvent`]s.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Fire-and-forget. An event with no subscribers is dropped.
    pub fn publish(&self, event: DispatchEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Dispatch event dropped: no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
