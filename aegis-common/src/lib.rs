//! Shared building blocks for the Aegis dispatch pipeline: the validated
//! [`SendCommand`](command::SendCommand), mailbox validation, pid file
//! handling and the logging setup used by every binary.

pub mod address;
pub mod command;
pub mod error;
pub mod logging;
pub mod process;

pub use tracing;

pub use command::{Attachment, Priority, Recipient, SendCommand, SendRequest};
pub use error::ValidationError;

/// Lifecycle signals broadcast to long-running components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop taking new work and return once the current unit of work is done
    Shutdown,
    /// Every component has acknowledged the shutdown
    Finalised,
}
