//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call:
//!     → circuit_breaker.rs (fail fast when the dependency is down)
//!     → timeouts.rs (every call has a deadline)
//!     → On failure: retries.rs (retry in-process) or backoff.rs (queue reschedules)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Webhook deliveries are never retried in-process; the queue owns that
//! - In-process retries are for the job store (startup ping, final flush)
//! - Circuit breaker prevents hammering a failing dependency

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;
