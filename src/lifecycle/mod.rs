//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → EventBus → breakers → store (wait until reachable)
//!     → queue → processor → workers → event logger
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop accepting → drain in-flight jobs → flush store
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: the store must answer before workers start
//! - Ordered shutdown: stop accepting, drain, flush
//! - Draining has a deadline; leases of abandoned jobs are released

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Dispatcher, StartupError};
