//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! queue / worker / breakers
//!     → events::EventBus (typed DispatchEvent)
//!     → logging.rs (structured log line per event)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON when configured)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging with job id, attempt and breaker name as fields
//! - Metrics are cheap (no-op without an installed recorder)

pub mod logging;
pub mod metrics;
