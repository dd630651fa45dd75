//! Circuit breaker for outbound dependencies.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: testing if dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first call at or after next_attempt_at
//! Half-Open → Closed: consecutive trial successes >= success_threshold
//! Half-Open → Open: any trial failure
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency name, held in an explicit registry
//! - Fail fast in Open state (operation never invoked)
//! - Single in-flight trial in Half-Open; concurrent calls are rejected
//! - Every transition bumps a generation; late results from calls admitted
//!   under an older generation never move the state machine

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::schema::lookup_breaker;
use crate::config::{BreakerConfig, DispatchConfig};
use crate::error::CallError;
use crate::events::{DispatchEvent, EventBus};
use crate::health::{HealthCheck, HealthStatus};
use crate::observability::metrics;
use crate::resilience::timeouts::with_deadline;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub failure_threshold: u32,
    pub success_threshold: u32,
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: CircuitState,
    generation: u64,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    next_attempt: Option<(Instant, DateTime<Utc>)>,
    trial_in_flight: bool,
    total_calls: u64,
    rejected_calls: u64,
}

/// A stateful guard around one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: ArcSwap<BreakerConfig>,
    inner: Mutex<BreakerInner>,
    events: Option<EventBus>,
}

/// Admission ticket for one call.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        // Caller dropped the future mid-trial: free the slot without counting.
        if self.trial && !self.settled {
            let mut inner = self.breaker.lock();
            if inner.generation == self.generation {
                inner.trial_in_flight = false;
            }
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: ArcSwap::from_pointee(config),
            inner: Mutex::new(BreakerInner::default()),
            events: None,
        }
    }

    /// Publish state transitions on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Replace thresholds. Current state and counters are kept.
    pub fn reconfigure(&self, config: BreakerConfig) {
        self.config.store(Arc::new(config));
    }

    /// Run `operation` through the breaker under the per-call timeout.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut permit = match self.try_acquire() {
            Ok(permit) => permit,
            Err(retry_in) => {
                return Err(CallError::CircuitOpen {
                    breaker: self.name.clone(),
                    retry_in,
                })
            }
        };
        let timeout = self.config.load().timeout();

        match with_deadline(timeout, operation()).await {
            Ok(Ok(value)) => {
                self.settle(&mut permit, true);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.settle(&mut permit, false);
                Err(CallError::Operation(e))
            }
            Err(_) => {
                self.settle(&mut permit, false);
                tracing::warn!(breaker = %self.name, timeout = ?timeout, "Call timed out");
                Err(CallError::Timeout {
                    breaker: self.name.clone(),
                    after: timeout,
                })
            }
        }
    }

    /// Immutable snapshot; never changes state.
    pub fn metrics(&self) -> BreakerMetrics {
        let config = self.config.load();
        let inner = self.lock();
        BreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_at: inner.last_failure_at,
            next_attempt_at: inner.next_attempt.map(|(_, wall)| wall),
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_acquire(&self) -> Result<Permit<'_>, Duration> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.total_calls += 1;

        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let ready_at = inner.next_attempt.map(|(at, _)| at).unwrap_or(now);
                if now < ready_at {
                    inner.rejected_calls += 1;
                    metrics::record_breaker_rejection(&self.name);
                    return Err(ready_at - now);
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.rejected_calls += 1;
                    metrics::record_breaker_rejection(&self.name);
                    return Err(Duration::ZERO);
                }
                inner.trial_in_flight = true;
                true
            }
        };

        Ok(Permit {
            breaker: self,
            generation: inner.generation,
            trial,
            settled: false,
        })
    }

    fn settle(&self, permit: &mut Permit<'_>, success: bool) {
        permit.settled = true;
        let config = self.config.load();
        let mut inner = self.lock();

        if !success {
            inner.last_failure_at = Some(Utc::now());
        }

        if inner.generation != permit.generation {
            tracing::debug!(breaker = %self.name, success, "Ignoring result from a previous circuit generation");
            return;
        }

        match (inner.state, success) {
            (CircuitState::Closed, true) => {
                inner.failure_count = 0;
            }
            (CircuitState::Closed, false) => {
                inner.failure_count += 1;
                if inner.failure_count >= config.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failure_count = inner.failure_count,
                        threshold = config.failure_threshold,
                        "Circuit breaker opened due to consecutive failures"
                    );
                    self.open(&mut inner, config.reset_timeout());
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.trial_in_flight = false;
                inner.success_count += 1;
                if inner.success_count >= config.success_threshold {
                    tracing::info!(breaker = %self.name, "Circuit breaker closed after successful trials");
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            (CircuitState::HalfOpen, false) => {
                inner.trial_in_flight = false;
                tracing::warn!(breaker = %self.name, "Circuit breaker reopened after failed trial");
                self.open(&mut inner, config.reset_timeout());
            }
            // Unreachable: opening bumps the generation.
            (CircuitState::Open, _) => {}
        }
    }

    fn open(&self, inner: &mut BreakerInner, reset_timeout: Duration) {
        self.transition(inner, CircuitState::Open);
        let wall = chrono::Duration::from_std(reset_timeout)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or_else(Utc::now);
        inner.next_attempt = Some((Instant::now() + reset_timeout, wall));
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.trial_in_flight = false;
        if to != CircuitState::Open {
            inner.next_attempt = None;
        }

        if self.events.is_none() {
            tracing::info!(breaker = %self.name, from = from.as_str(), to = to.as_str(), "Circuit state changed");
        }
        metrics::record_breaker_state(&self.name, to);
        if let Some(events) = &self.events {
            events.publish(DispatchEvent::BreakerStateChanged {
                breaker: self.name.clone(),
                from,
                to,
            });
        }
    }
}

/// Thresholds the registry hands to breakers it creates.
#[derive(Debug, Clone, Default)]
struct BreakerDefaults {
    default: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
}

impl BreakerDefaults {
    fn for_name(&self, name: &str) -> BreakerConfig {
        lookup_breaker(&self.overrides, &self.default, name)
    }
}

/// Explicit map from dependency name to breaker, owned by the composition root.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: ArcSwap<BreakerDefaults>,
    events: Option<EventBus>,
}

impl CircuitBreakerRegistry {
    pub fn new(default: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults: ArcSwap::from_pointee(BreakerDefaults {
                default,
                overrides: HashMap::new(),
            }),
            events: None,
        }
    }

    /// Registry seeded with the default and per-name breaker settings.
    pub fn from_config(config: &DispatchConfig) -> Self {
        let registry = Self::new(config.breaker.clone());
        registry.reconfigure(config);
        registry
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Breaker for `name`, created on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self.defaults.load().for_name(name);
                tracing::debug!(breaker = %name, ?config, "Creating circuit breaker");
                let mut breaker = CircuitBreaker::new(name, config);
                if let Some(bus) = &self.events {
                    breaker = breaker.with_events(bus.clone());
                }
                Arc::new(breaker)
            })
            .clone()
    }

    /// Apply new thresholds to future and existing breakers.
    pub fn reconfigure(&self, config: &DispatchConfig) {
        let defaults = BreakerDefaults {
            default: config.breaker.clone(),
            overrides: config.breakers.clone(),
        };
        for entry in self.breakers.iter() {
            entry.value().reconfigure(defaults.for_name(entry.key()));
        }
        self.defaults.store(Arc::new(defaults));
    }

    /// Snapshot of every breaker, sorted by name.
    pub fn metrics(&self) -> Vec<BreakerMetrics> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.value().metrics()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

#[async_trait]
impl HealthCheck for CircuitBreakerRegistry {
    fn component(&self) -> &str {
        "circuit-breakers"
    }

    async fn check_health(&self) -> HealthStatus {
        let open: Vec<String> = self
            .metrics()
            .into_iter()
            .filter(|m| m.state != CircuitState::Closed)
            .map(|m| format!("{} {}", m.name, m.state.as_str()))
            .collect();

        if open.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::degraded(open.join(", "))
        }
    }
}
