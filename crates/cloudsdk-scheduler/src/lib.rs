//! Background job primitives for Cloud SDK maintenance work.
//!
//! Jobs are plain closures drained in submission order by a [`SerialQueue`]. Every job carries a
//! [`CancellationToken`]; cancellation is cooperative and is reported as a value
//! ([`Cancelled`] / [`TaskError::Cancelled`]) rather than by unwinding.

use std::any::Any;

mod job;
mod queue;

pub use job::{JobContext, JobHandle, JobState};
pub use queue::{QueueClosed, SerialQueue};
pub use tokio_util::sync::CancellationToken;

/// Marker returned by cooperative code that observed a cancelled token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

impl Cancelled {
    /// Returns `Err(Cancelled)` when `token` has been cancelled.
    pub fn check(token: &CancellationToken) -> Result<(), Cancelled> {
        if token.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl From<Cancelled> for TaskError {
    fn from(_: Cancelled) -> Self {
        TaskError::Cancelled
    }
}

/// Extracts a readable message from a `catch_unwind` payload.
pub fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "<non-string panic payload>".to_string()
}
