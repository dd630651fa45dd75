//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Admin `/admin/health`
//!     → check_all over every registered component
//!     → HealthCheck::check_health (store ping, breaker states, ...)
//!     → HealthReport (worst status wins)
//! ```
//!
//! # Design Decisions
//! - Health is opt-in per component: the default answer is `Unsupported`
//! - `Unsupported` never degrades the overall report
//! - Any open breaker degrades the report, an unreachable store fails it

pub mod state;

pub use state::{check_all, ComponentHealth, HealthCheck, HealthReport, HealthStatus};
