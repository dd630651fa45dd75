//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)              DISPATCH_* environment
//!     → loader.rs (parse)  ──────→ loader.rs (overrides)
//!     → validation.rs (semantic checks)
//!     → DispatchConfig (validated, immutable)
//!     → shared with the breaker registry, queue and processor
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of breaker defaults and retention windows
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Environment wins over file
//! - Only breaker thresholds and retention windows are hot-reloadable;
//!   queue sizing and bind addresses need a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_from_env, ConfigError};
pub use schema::{
    AdminConfig, BreakerConfig, DeliveryConfig, DispatchConfig, ObservabilityConfig,
    QueueConfig, RetentionConfig, StoreConfig,
};
