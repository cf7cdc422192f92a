use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// The most recent failure of one message within a partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub message_id: String,
    pub failed_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: String,
}

/// One day's worth of failures, as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub date: NaiveDate,
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
}

impl Partition {
    #[must_use]
    pub const fn new(date: NaiveDate) -> Self {
        Self {
            date,
            failures: Vec::new(),
        }
    }

    /// Insert `record`, replacing an existing record for the same message in place.
    pub fn upsert(&mut self, record: FailureRecord) {
        match self
            .failures
            .iter_mut()
            .find(|existing| existing.message_id == record.message_id)
        {
            Some(existing) => *existing = record,
            None => self.failures.push(record),
        }
    }

    /// Remove the record for `message_id`, returning whether one existed.
    pub fn remove(&mut self, message_id: &str) -> bool {
        let before = self.failures.len();
        self.failures.retain(|failure| failure.message_id != message_id);
        self.failures.len() != before
    }

    #[must_use]
    pub fn find(&self, message_id: &str) -> Option<&FailureRecord> {
        self.failures
            .iter()
            .find(|failure| failure.message_id == message_id)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of a status lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// No failure is recorded for the message
    Sent,
    /// The message failed; the record holds the latest attempt
    Failed(FailureRecord),
}

/// Summary of a single partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionStats {
    pub date: NaiveDate,
    pub count: usize,
    pub failures: Vec<FailureRecord>,
}

impl From<Partition> for PartitionStats {
    fn from(partition: Partition) -> Self {
        Self {
            date: partition.date,
            count: partition.failures.len(),
            failures: partition.failures,
        }
    }
}

/// Parse a strict `YYYY-MM-DD` date.
///
/// # Errors
///
/// Returns [`LedgerError::InvalidDate`] for anything else, including
/// unpadded or out of range components.
pub fn parse_partition_date(input: &str) -> Result<NaiveDate> {
    let well_formed = input.len() == 10
        && input.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        });

    if !well_formed {
        return Err(LedgerError::InvalidDate(input.to_string()));
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|_| LedgerError::InvalidDate(input.to_string()))
}
