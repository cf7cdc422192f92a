use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use aegis_common::internal;
use chrono::{DateTime, Days, NaiveDate, Utc};
use tracing::{debug, error, instrument, warn};

use crate::{
    config::LedgerConfig,
    error::{LedgerError, Result},
    lock::PartitionLock,
    record::{DeliveryStatus, FailureRecord, Partition, PartitionStats, parse_partition_date},
};

const TEMP_PREFIX: &str = ".tmp_";

/// Handle to the on-disk ledger.
///
/// All operations are blocking; async callers should move them onto a
/// blocking thread. Handles are cheap to clone and may be shared freely:
/// writers are serialised per partition with an advisory file lock and
/// partitions are replaced atomically, so readers never observe a partial
/// document.
#[derive(Debug, Clone)]
pub struct DeliveryLedger {
    root: PathBuf,
    retention_days: Option<u32>,
}

impl DeliveryLedger {
    /// Open (creating if needed) the ledger rooted at `root`.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(LedgerError::io(&root))?;

        Ok(Self {
            root,
            retention_days: None,
        })
    }

    /// Open the ledger described by `config`.
    ///
    /// # Errors
    ///
    /// See [`DeliveryLedger::open`].
    pub fn from_config(config: &LedgerConfig) -> Result<Self> {
        let mut ledger = Self::open(&config.path)?;
        ledger.retention_days = config.retention_days;
        Ok(ledger)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn retention_days(&self) -> Option<u32> {
        self.retention_days
    }

    /// Record a failure for `message_id` in today's partition.
    ///
    /// # Errors
    ///
    /// Fails if the partition cannot be locked, read or written.
    pub fn record_failure(
        &self,
        message_id: &str,
        error: &str,
        attempts: u32,
    ) -> Result<FailureRecord> {
        self.record_failure_at(message_id, error, attempts, Utc::now())
    }

    /// Record a failure that happened at `failed_at`; the partition is the
    /// UTC date of that instant.
    ///
    /// # Errors
    ///
    /// See [`DeliveryLedger::record_failure`].
    #[instrument(skip(self, error), fields(date))]
    pub fn record_failure_at(
        &self,
        message_id: &str,
        error: &str,
        attempts: u32,
        failed_at: DateTime<Utc>,
    ) -> Result<FailureRecord> {
        let date = failed_at.date_naive();
        tracing::Span::current().record("date", tracing::field::display(date));

        let record = FailureRecord {
            message_id: message_id.to_string(),
            failed_at,
            attempts,
            last_error: error.to_string(),
        };

        let _lock = self.lock(date)?;

        let mut partition = match self.load(date) {
            Ok(partition) => partition.unwrap_or_else(|| Partition::new(date)),
            Err(LedgerError::Corrupt { path, source }) => {
                self.quarantine(&path, &source)?;
                Partition::new(date)
            }
            Err(e) => return Err(e),
        };

        partition.upsert(record.clone());
        self.store(&partition)?;

        error!(
            message_id,
            attempts,
            error,
            date = %date,
            "Email delivery failed"
        );

        Ok(record)
    }

    /// Look up the delivery status of `message_id`.
    ///
    /// With a date only that partition is consulted; without one every
    /// partition is scanned, newest first. Corrupt partitions are skipped.
    ///
    /// # Errors
    ///
    /// Fails if the ledger directory or a partition cannot be read.
    #[instrument(skip(self))]
    pub fn get_status(&self, message_id: &str, date: Option<NaiveDate>) -> Result<DeliveryStatus> {
        let dates = match date {
            Some(date) => vec![date],
            None => self.partition_dates()?,
        };

        for date in dates {
            let Some(partition) = self.load_lenient(date)? else {
                continue;
            };

            if let Some(record) = partition.find(message_id) {
                return Ok(DeliveryStatus::Failed(record.clone()));
            }
        }

        Ok(DeliveryStatus::Sent)
    }

    /// Forget the failure recorded for `message_id` on `date`, deleting the
    /// partition once it is empty.
    ///
    /// Returns whether a record was removed. A missing partition is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Fails if the partition cannot be locked, read or written.
    #[instrument(skip(self))]
    pub fn remove_success(&self, message_id: &str, date: NaiveDate) -> Result<bool> {
        let _lock = self.lock(date)?;

        let Some(mut partition) = self.load_lenient(date)? else {
            return Ok(false);
        };

        if !partition.remove(message_id) {
            return Ok(false);
        }

        if partition.is_empty() {
            let path = self.partition_path(date);
            fs::remove_file(&path).map_err(LedgerError::io(&path))?;
            debug!(date = %date, "Removed empty ledger partition");
        } else {
            self.store(&partition)?;
        }

        internal!(
            level = INFO,
            "Cleared failure record for {message_id} on {date} after successful delivery"
        );

        Ok(true)
    }

    /// Per-partition failure counts, newest first. With a date only that
    /// partition is reported (with a count of zero if it does not exist).
    ///
    /// # Errors
    ///
    /// Fails if the ledger directory or a partition cannot be read.
    pub fn failure_stats(&self, date: Option<NaiveDate>) -> Result<Vec<PartitionStats>> {
        if let Some(date) = date {
            let partition = self
                .load_lenient(date)?
                .unwrap_or_else(|| Partition::new(date));
            return Ok(vec![partition.into()]);
        }

        let mut stats = Vec::new();
        for date in self.partition_dates()? {
            if let Some(partition) = self.load_lenient(date)? {
                stats.push(partition.into());
            }
        }

        Ok(stats)
    }

    /// Delete partitions more than `days` days older than today (UTC).
    ///
    /// # Errors
    ///
    /// See [`DeliveryLedger::prune_before`].
    pub fn prune_older_than(&self, days: u32) -> Result<usize> {
        let today = Utc::now().date_naive();
        let cutoff = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);

        self.prune_before(cutoff)
    }

    /// Apply the configured retention, if any.
    ///
    /// # Errors
    ///
    /// See [`DeliveryLedger::prune_before`].
    pub fn prune_expired(&self) -> Result<usize> {
        self.retention_days
            .map_or(Ok(0), |days| self.prune_older_than(days))
    }

    /// Delete every partition dated strictly before `cutoff`, returning how
    /// many were removed.
    ///
    /// # Errors
    ///
    /// Fails if the ledger directory cannot be listed or a partition cannot
    /// be removed.
    #[instrument(skip(self))]
    pub fn prune_before(&self, cutoff: NaiveDate) -> Result<usize> {
        let mut removed = 0;

        for date in self.partition_dates()? {
            if date >= cutoff {
                continue;
            }

            let lock_path = self.lock_path(date);
            let lock = PartitionLock::acquire(lock_path.clone())?;
            let path = self.partition_path(date);
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(LedgerError::Io { path, source: e }),
            }
            lock.remove(&lock_path)?;
        }

        if removed > 0 {
            internal!(
                level = INFO,
                "Pruned {removed} ledger partition(s) older than {cutoff}"
            );
        }

        Ok(removed)
    }

    /// Check that the ledger directory exists and is writable.
    ///
    /// # Errors
    ///
    /// Returns the I/O error encountered while writing a probe file.
    pub fn probe(&self) -> Result<()> {
        let path = self.root.join(format!("{TEMP_PREFIX}probe_{}", std::process::id()));
        fs::write(&path, b"probe").map_err(LedgerError::io(&path))?;
        fs::remove_file(&path).map_err(LedgerError::io(&path))
    }

    fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.root.join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    fn lock_path(&self, date: NaiveDate) -> PathBuf {
        self.root.join(format!(".{}.lock", date.format("%Y-%m-%d")))
    }

    fn lock(&self, date: NaiveDate) -> Result<PartitionLock> {
        PartitionLock::acquire(self.lock_path(date))
    }

    /// Dates of every partition on disk, newest first
    fn partition_dates(&self) -> Result<Vec<NaiveDate>> {
        let entries = fs::read_dir(&self.root).map_err(LedgerError::io(&self.root))?;

        let mut dates = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let stem = name.to_str()?.strip_suffix(".json")?;
                parse_partition_date(stem).ok()
            })
            .collect::<Vec<_>>();

        dates.sort_unstable_by(|a, b| b.cmp(a));
        Ok(dates)
    }

    fn load(&self, date: NaiveDate) -> Result<Option<Partition>> {
        let path = self.partition_path(date);

        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LedgerError::Io { path, source: e }),
        };

        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(|source| LedgerError::Corrupt { path, source })
    }

    /// Like [`Self::load`], but a corrupt partition reads as absent.
    fn load_lenient(&self, date: NaiveDate) -> Result<Option<Partition>> {
        match self.load(date) {
            Err(LedgerError::Corrupt { path, source }) => {
                warn!(path = %path.display(), error = %source, "Skipping corrupt ledger partition");
                Ok(None)
            }
            other => other,
        }
    }

    /// Write `partition` to a temporary file and rename it into place.
    fn store(&self, partition: &Partition) -> Result<()> {
        let path = self.partition_path(partition.date);
        let temp = self.root.join(format!(
            "{TEMP_PREFIX}{}.json",
            partition.date.format("%Y-%m-%d")
        ));

        let contents = serde_json::to_vec_pretty(partition)?;

        let mut file = File::create(&temp).map_err(LedgerError::io(&temp))?;
        file.write_all(&contents)
            .and_then(|()| file.sync_all())
            .map_err(LedgerError::io(&temp))?;

        fs::rename(&temp, &path).map_err(LedgerError::io(&path))
    }

    /// Move a corrupt partition aside so the next write starts fresh without
    /// destroying what was there.
    fn quarantine(&self, path: &Path, source: &serde_json::Error) -> Result<()> {
        let aside = path.with_extension(format!("json.corrupt-{}", Utc::now().timestamp()));
        error!(
            path = %path.display(),
            moved_to = %aside.display(),
            error = %source,
            "Ledger partition is corrupt, moving it aside"
        );
        fs::rename(path, &aside).map_err(LedgerError::io(path))
    }
}
