pub mod backends;
pub mod config;
pub mod error;
pub mod queue;
pub mod types;

pub use backends::{FileQueue, FileQueueBuilder, MemoryQueue};
pub use config::QueueConfig;
pub use error::{QueueError, Result};
pub use queue::{MessageQueue, QueueStats};
pub use types::{Lease, LeaseToken, MessageId, QueuedJob};
