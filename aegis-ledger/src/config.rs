use std::path::PathBuf;

use serde::Deserialize;

/// Where failure partitions live and how long they are kept
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Partitions older than this many days are pruned by the worker.
    /// `None` keeps every partition.
    #[serde(default)]
    pub retention_days: Option<u32>,
}

fn default_path() -> PathBuf {
    PathBuf::from("/var/lib/aegis/delivery/failed")
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            retention_days: None,
        }
    }
}
