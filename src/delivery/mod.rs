//! Webhook delivery.
//!
//! # Data Flow
//! ```text
//! DeliveryJob (job.rs)
//!     → serialize payload once
//!     → signer.rs (HMAC-SHA256 over those bytes)
//!     → processor.rs (POST, classify)
//!     → WebhookDeliveryResult | DeliveryError → queue
//! ```

pub mod job;
pub mod processor;
pub mod signer;

pub use job::{truncate_chars, DeliveryJob, NewDelivery, WebhookDeliveryResult};
pub use processor::{breaker_name, WebhookProcessor};
