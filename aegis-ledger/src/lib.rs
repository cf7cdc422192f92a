//! Delivery failure ledger.
//!
//! Failures are grouped into one JSON document per UTC day. A message id that
//! appears in no partition is considered delivered: the ledger is an
//! exception log, not an audit trail.

mod config;
mod error;
mod ledger;
mod lock;
mod record;

pub use config::LedgerConfig;
pub use error::{LedgerError, Result};
pub use ledger::DeliveryLedger;
pub use record::{DeliveryStatus, FailureRecord, Partition, PartitionStats, parse_partition_date};
