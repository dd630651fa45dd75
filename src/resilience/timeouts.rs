//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap outbound calls with a deadline
//! - Cancel the in-flight future cleanly when the deadline passes
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;

/// The deadline passed before the future completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline of {0:?} elapsed")]
pub struct DeadlineExceeded(pub Duration);

/// Run `fut` to completion or drop it once `deadline` elapses.
pub async fn with_deadline<F, T>(deadline: Duration, fut: F) -> Result<T, DeadlineExceeded>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| DeadlineExceeded(deadline))
}
