use std::{path::PathBuf, sync::Arc, time::Duration};

use serde::Deserialize;

use crate::{FileQueue, MemoryQueue, Result, queue::MessageQueue};

const fn default_lease_secs() -> u64 {
    300
}

fn default_path() -> PathBuf {
    PathBuf::from("/var/spool/aegis")
}

/// Configuration for the work queue
///
/// File-backed queue in RON config:
/// ```ron
/// Aegis (
///     queue: File(
///         path: "/var/spool/aegis",
///         lease_secs: 300,
///     ),
/// )
/// ```
///
/// Memory-backed queue for testing:
/// ```ron
/// Aegis (
///     queue: Memory(capacity: 1000),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum QueueConfig {
    /// Durable filesystem queue (production)
    File {
        #[serde(default = "default_path")]
        path: PathBuf,
        /// How long a claim stays valid without being acknowledged
        #[serde(default = "default_lease_secs")]
        lease_secs: u64,
    },
    /// In-process queue (testing/development); nothing survives a restart
    Memory {
        /// Maximum number of jobs held (omit for unlimited)
        #[serde(default)]
        capacity: Option<usize>,
        #[serde(default = "default_lease_secs")]
        lease_secs: u64,
    },
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::File {
            path: default_path(),
            lease_secs: default_lease_secs(),
        }
    }
}

impl QueueConfig {
    /// The queue root for file-backed queues
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File { path, .. } => Some(path),
            Self::Memory { .. } => None,
        }
    }

    /// Build and initialise the configured queue.
    ///
    /// # Errors
    /// Returns an error if the file queue path is rejected or its directory
    /// layout cannot be created.
    pub fn into_queue(self) -> Result<Arc<dyn MessageQueue>> {
        match self {
            Self::File { path, lease_secs } => {
                let queue = FileQueue::builder()
                    .path(path)
                    .lease_duration(Duration::from_secs(lease_secs))
                    .build()?;
                queue.init()?;
                Ok(Arc::new(queue))
            }
            Self::Memory {
                capacity,
                lease_secs,
            } => {
                let queue = capacity.map_or_else(MemoryQueue::new, MemoryQueue::with_capacity);
                Ok(Arc::new(
                    queue.lease_duration(Duration::from_secs(lease_secs)),
                ))
            }
        }
    }
}
