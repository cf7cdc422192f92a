//! Message status lookups against the delivery ledger.

use aegis_ledger::{DeliveryLedger, DeliveryStatus, FailureRecord, LedgerError, parse_partition_date};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

/// Malformed lookups; ledger trouble is reported as [`LookupStatus::Unknown`]
#[derive(Debug, Error)]
pub enum StatusQueryError {
    #[error("Message ID is required")]
    MissingMessageId,

    #[error("Invalid date format '{0}'. Use YYYY-MM-DD")]
    InvalidDate(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LookupStatus {
    Sent {
        message: &'static str,
    },
    Failed {
        message: &'static str,
        details: FailureRecord,
    },
    /// The ledger could not be read, so absence proves nothing
    Unknown {
        message: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageStatus {
    pub message_id: String,
    pub lookup_date: Option<NaiveDate>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub status: LookupStatus,
}

impl MessageStatus {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.status, LookupStatus::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct StatusQuery {
    ledger: DeliveryLedger,
}

impl StatusQuery {
    #[must_use]
    pub const fn new(ledger: DeliveryLedger) -> Self {
        Self { ledger }
    }

    /// Look up the delivery status of `message_id`.
    ///
    /// With a `date` only that day's partition is consulted; without one every
    /// partition is searched, newest first.
    ///
    /// # Errors
    ///
    /// Fails only for an empty id or a date not in `YYYY-MM-DD` form.
    pub fn message_status(
        &self,
        message_id: &str,
        date: Option<&str>,
    ) -> Result<MessageStatus, StatusQueryError> {
        let message_id = message_id.trim();
        if message_id.is_empty() {
            return Err(StatusQueryError::MissingMessageId);
        }

        let lookup_date = date
            .map(|date| {
                parse_partition_date(date)
                    .map_err(|_| StatusQueryError::InvalidDate(date.to_string()))
            })
            .transpose()?;

        let status = match self.ledger.get_status(message_id, lookup_date) {
            Ok(DeliveryStatus::Sent) => LookupStatus::Sent {
                message: "Email delivered successfully",
            },
            Ok(DeliveryStatus::Failed(record)) => LookupStatus::Failed {
                message: "Email delivery failed",
                details: record,
            },
            Err(e) => {
                tracing::warn!(message_id, error = %e, "Failed to read delivery ledger");
                unknown(&e)
            }
        };

        Ok(MessageStatus {
            message_id: message_id.to_string(),
            lookup_date,
            timestamp: Utc::now(),
            status,
        })
    }
}

fn unknown(error: &LedgerError) -> LookupStatus {
    LookupStatus::Unknown {
        message: "Delivery status could not be determined",
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_rejects_malformed_input() {
        let dir = tempfile::tempdir().unwrap();
        let query = StatusQuery::new(DeliveryLedger::open(dir.path()).unwrap());

        assert!(matches!(
            query.message_status("  ", None),
            Err(StatusQueryError::MissingMessageId)
        ));

        for date in ["2024-1-05", "05-01-2024", "2024/01/05", "2024-02-30", "today"] {
            assert!(
                matches!(
                    query.message_status("01J0000000000000000000000", Some(date)),
                    Err(StatusQueryError::InvalidDate(d)) if d == date
                ),
                "{date}"
            );
        }
    }

    #[test]
    fn test_sent_and_failed() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = DeliveryLedger::open(dir.path()).unwrap();
        let record = ledger
            .record_failure("01HZX0FAILED0000000000000", "Permanent failure: mailbox unavailable", 1)
            .unwrap();
        let query = StatusQuery::new(ledger);

        let sent = query.message_status("01HZX0SENT000000000000000", None).unwrap();
        assert!(matches!(sent.status, LookupStatus::Sent { .. }));

        let date = record.failed_at.date_naive().format("%Y-%m-%d").to_string();
        let failed = query
            .message_status("01HZX0FAILED0000000000000", Some(&date))
            .unwrap();
        assert!(failed.is_failed());
        assert_eq!(failed.lookup_date, Some(record.failed_at.date_naive()));

        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["details"]["attempts"], 1);
        assert_eq!(json["details"]["last_error"], "Permanent failure: mailbox unavailable");
        assert_eq!(json["lookup_date"], date.as_str());
    }

    #[test]
    fn test_unreadable_ledger_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = DeliveryLedger::open(dir.path().join("ledger")).unwrap();
        let query = StatusQuery::new(ledger);

        // Replace the ledger directory with a plain file
        std::fs::remove_dir(dir.path().join("ledger")).unwrap();
        std::fs::write(dir.path().join("ledger"), b"not a directory").unwrap();

        let status = query.message_status("01HZX0SENT000000000000000", None).unwrap();
        assert!(matches!(status.status, LookupStatus::Unknown { .. }));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "unknown");
    }
}
