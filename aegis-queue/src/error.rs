//! Error types for the aegis-queue crate.

use std::io;

use thiserror::Error;

use crate::MessageId;

/// Top-level queue error type.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The durable store could not be reached or written. Producers should
    /// surface this as a retryable failure; nothing was enqueued.
    #[error("Queue unavailable: {0}")]
    Unavailable(#[source] io::Error),

    /// I/O failure while manipulating an existing job.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A job file could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No job with this id is in the requested state.
    #[error("Message not found: {0}")]
    NotFound(MessageId),

    /// The lease expired and the job was handed to another claimer (or
    /// returned to the queue) before it was acknowledged.
    #[error("Lease lost for message {0}")]
    LeaseLost(MessageId),

    /// Queue configuration rejected.
    #[error("Queue validation error: {0}")]
    Validation(String),

    /// The in-memory queue is full.
    #[error("Queue capacity exceeded: {len}/{capacity} jobs")]
    CapacityExceeded { len: usize, capacity: usize },

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Specialized `Result` type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

impl<T> From<std::sync::PoisonError<T>> for QueueError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}
