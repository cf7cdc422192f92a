use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
    time::{Duration, SystemTime},
};

use aegis_common::internal;
use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, instrument, warn};

use crate::{
    Lease, LeaseToken, MessageId, QueueError, QueuedJob, Result,
    queue::{MessageQueue, QueueStats},
    types::{now_millis, to_millis},
};

const READY: &str = "ready";
const LEASED: &str = "leased";
const DEFERRED: &str = "deferred";
const CORRUPT: &str = "corrupt";
const TEMP_PREFIX: &str = ".tmp_";

const fn default_lease_secs() -> u64 {
    300
}

/// Filesystem queue
///
/// Each job is a JSON file whose directory encodes its state:
/// - `ready/{id}.json` - waiting to be claimed
/// - `leased/{id}@{expires_ms}.json` - claimed until the given instant
/// - `deferred/{id}@{due_ms}.json` - hidden until the given instant
/// - `corrupt/{id}.json` - could not be decoded; kept for inspection
///
/// # Claims
/// A claim is a `rename` from `ready/` into `leased/`. Renames within one
/// filesystem are atomic, so when several workers race for the same file
/// exactly one of them succeeds and the others see `NotFound` and move on.
///
/// # Atomicity
/// New content is always written to a `.tmp_` file first and renamed into
/// place, so a crash never leaves a half-written job visible. Leftover temp
/// files are ignored by listing and removed by [`FileQueue::init`].
#[derive(Debug, Clone)]
pub struct FileQueue {
    path: PathBuf,
    lease_duration: Duration,
}

impl Default for FileQueue {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/aegis"),
            lease_duration: Duration::from_secs(default_lease_secs()),
        }
    }
}

impl FileQueue {
    /// Validate a queue root
    ///
    /// # Security Checks
    /// - Rejects paths containing `..` (directory traversal)
    /// - Rejects relative paths
    /// - Rejects sensitive system directories
    fn validate_path(path: &Path) -> Result<()> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(QueueError::Validation(format!(
                "Queue path cannot contain '..' components: {}",
                path.display()
            )));
        }

        if !path.is_absolute() {
            return Err(QueueError::Validation(format!(
                "Queue path must be absolute: {}",
                path.display()
            )));
        }

        let sensitive_prefixes = [
            "/etc",
            "/bin",
            "/sbin",
            "/usr/bin",
            "/usr/sbin",
            "/boot",
            "/sys",
            "/proc",
            "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes.iter().find(|p| path.starts_with(p)) {
            return Err(QueueError::Validation(format!(
                "Queue path cannot be in system directory {prefix}: {}",
                path.display()
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn builder() -> FileQueueBuilder {
        FileQueueBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Create the directory layout and clear leftovers from a crash.
    ///
    /// Leased jobs are left alone: if their owner is gone they become ready
    /// again once the lease runs out.
    ///
    /// # Errors
    /// Returns [`QueueError::Unavailable`] if the directories cannot be
    /// created, or an I/O error if the root exists but is not a directory.
    pub fn init(&self) -> Result<()> {
        internal!("Initialising queue at {} ...", self.path.display());

        if self.path.exists() && !self.path.is_dir() {
            return Err(QueueError::Io(io::Error::new(
                ErrorKind::NotADirectory,
                format!(
                    "Expected {} to be a Directory, but it is not",
                    self.path.display()
                ),
            )));
        }

        for state in [READY, LEASED, DEFERRED, CORRUPT] {
            std::fs::create_dir_all(self.path.join(state)).map_err(QueueError::Unavailable)?;
        }

        let mut cleaned = 0;
        for state in [READY, LEASED, DEFERRED] {
            for entry in std::fs::read_dir(self.path.join(state))? {
                let entry = entry?;
                if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                    std::fs::remove_file(entry.path())?;
                    cleaned += 1;
                }
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned temporary files from queue"
            );
        }

        Ok(())
    }

    fn ready_path(&self, id: &MessageId) -> PathBuf {
        self.path.join(READY).join(format!("{id}.json"))
    }

    fn leased_path(&self, id: &MessageId, expires_ms: u64) -> PathBuf {
        self.path.join(LEASED).join(format!("{id}@{expires_ms}.json"))
    }

    fn deferred_path(&self, id: &MessageId, due_ms: u64) -> PathBuf {
        self.path.join(DEFERRED).join(format!("{id}@{due_ms}.json"))
    }

    /// Write `job` next to `target` under a temporary name, then rename it over
    /// `target`.
    async fn write_atomic(&self, target: &Path, job: &QueuedJob) -> io::Result<()> {
        let encoded = serde_json::to_vec_pretty(job).map_err(io::Error::other)?;

        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = target.with_file_name(format!("{TEMP_PREFIX}{file_name}"));

        fs::write(&temp, &encoded).await?;
        if let Err(e) = fs::rename(&temp, target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }

        Ok(())
    }

    /// Entries of one state directory, oldest id first, skipping anything that
    /// is not a well formed job file name.
    async fn scan(&self, state: &str) -> Result<Vec<(MessageId, Option<u64>)>> {
        let mut entries = fs::read_dir(self.path.join(state)).await?;
        let mut found = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if !filename.starts_with(TEMP_PREFIX)
                && let Some(parsed) = MessageId::from_filename(&filename)
            {
                found.push(parsed);
            }
        }

        found.sort();
        Ok(found)
    }

    /// Move every leased job whose lease has run out back to `ready/`.
    async fn reclaim_expired(&self, now_ms: u64) -> Result<usize> {
        let mut reclaimed = 0;

        for (id, expires) in self.scan(LEASED).await? {
            let Some(expires) = expires.filter(|&expires| expires <= now_ms) else {
                continue;
            };

            match fs::rename(self.leased_path(&id, expires), self.ready_path(&id)).await {
                Ok(()) => {
                    warn!(message_id = %id, "Lease expired, returning job to the queue");
                    reclaimed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(reclaimed)
    }

    /// Move every deferred job that is due back to `ready/`.
    async fn promote_due(&self, now_ms: u64) -> Result<usize> {
        let mut promoted = 0;

        for (id, due) in self.scan(DEFERRED).await? {
            let Some(due) = due.filter(|&due| due <= now_ms) else {
                continue;
            };

            match fs::rename(self.deferred_path(&id, due), self.ready_path(&id)).await {
                Ok(()) => {
                    debug!(message_id = %id, "Deferred job is due");
                    promoted += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(promoted)
    }

    /// Try to claim one specific ready job. `Ok(None)` means another claimer
    /// got there first or the file turned out to be unreadable.
    async fn try_claim(&self, id: &MessageId, now_ms: u64) -> Result<Option<Lease>> {
        let lease_ms = u64::try_from(self.lease_duration.as_millis()).unwrap_or(u64::MAX);
        let expires_ms = now_ms.saturating_add(lease_ms);
        let leased = self.leased_path(id, expires_ms);

        match fs::rename(self.ready_path(id), &leased).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let contents = fs::read(&leased).await?;
        let mut job: QueuedJob = match serde_json::from_slice(&contents) {
            Ok(job) => job,
            Err(e) => {
                let corrupt = self.path.join(CORRUPT).join(format!("{id}.json"));
                warn!(
                    message_id = %id,
                    error = %e,
                    "Job file is unreadable, moving it to {}",
                    corrupt.display()
                );
                fs::rename(&leased, &corrupt).await?;
                return Ok(None);
            }
        };

        job.attempts = job.attempts.saturating_add(1);
        self.write_atomic(&leased, &job).await?;

        Ok(Some(Lease::new(job, LeaseToken::new(id.clone(), expires_ms))))
    }

    async fn count(&self, state: &str) -> Result<usize> {
        Ok(self.scan(state).await?.len())
    }
}

#[async_trait]
impl MessageQueue for FileQueue {
    #[instrument(level = "debug", skip_all, fields(message_id = %job.id))]
    async fn enqueue_job(&self, job: QueuedJob) -> Result<()> {
        let target = self.ready_path(&job.id);

        if fs::try_exists(&target).await.unwrap_or(false) {
            return Err(QueueError::Internal(format!(
                "ULID collision detected: {}. This should never happen.",
                job.id
            )));
        }

        self.write_atomic(&target, &job)
            .await
            .map_err(QueueError::Unavailable)?;

        internal!(
            level = DEBUG,
            "Queued message {} to {}",
            job.id,
            target.display()
        );

        Ok(())
    }

    async fn consume(&self) -> Result<Option<Lease>> {
        let now_ms = now_millis();

        self.reclaim_expired(now_ms).await?;
        self.promote_due(now_ms).await?;

        for (id, _) in self.scan(READY).await? {
            if let Some(lease) = self.try_claim(&id, now_ms).await? {
                debug!(
                    message_id = %id,
                    attempts = lease.job().attempts,
                    "Claimed job"
                );
                return Ok(Some(lease));
            }
        }

        Ok(None)
    }

    #[instrument(level = "debug", skip_all, fields(message_id = %token.id()))]
    async fn ack(&self, token: &LeaseToken) -> Result<()> {
        match fs::remove_file(self.leased_path(token.id(), token.expires_at_ms())).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(QueueError::LeaseLost(token.id().clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(level = "debug", skip_all, fields(message_id = %token.id()))]
    async fn nack(&self, token: &LeaseToken) -> Result<()> {
        match fs::rename(
            self.leased_path(token.id(), token.expires_at_ms()),
            self.ready_path(token.id()),
        )
        .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(QueueError::LeaseLost(token.id().clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(level = "debug", skip_all, fields(message_id = %token.id()))]
    async fn defer(&self, token: &LeaseToken, job: QueuedJob, until: SystemTime) -> Result<()> {
        let leased = self.leased_path(token.id(), token.expires_at_ms());
        if !fs::try_exists(&leased).await? {
            return Err(QueueError::LeaseLost(token.id().clone()));
        }

        let deferred = self.deferred_path(token.id(), to_millis(until));
        self.write_atomic(&deferred, &job).await?;

        // The deferred copy is durable; losing the race on the lease file now
        // only means the job may run once more.
        match fs::remove_file(&leased).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(QueueError::LeaseLost(token.id().clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn peek(&self, id: &MessageId) -> Result<Option<QueuedJob>> {
        match fs::read(self.ready_path(id)).await {
            Ok(contents) => Ok(Some(serde_json::from_slice(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<MessageId>> {
        Ok(self
            .scan(READY)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            ready: self.count(READY).await?,
            leased: self.count(LEASED).await?,
            deferred: self.count(DEFERRED).await?,
        })
    }

    async fn probe(&self) -> Result<()> {
        let probe = self
            .path
            .join(READY)
            .join(format!("{TEMP_PREFIX}probe_{}", std::process::id()));

        fs::write(&probe, b"probe")
            .await
            .map_err(QueueError::Unavailable)?;
        fs::remove_file(&probe)
            .await
            .map_err(QueueError::Unavailable)
    }
}

/// Builder for [`FileQueue`]
#[derive(Debug, Default)]
pub struct FileQueueBuilder {
    path: Option<PathBuf>,
    lease_duration: Option<Duration>,
}

impl FileQueueBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub const fn lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = Some(lease_duration);
        self
    }

    /// # Errors
    /// Returns [`QueueError::Validation`] if the path is unsafe.
    pub fn build(self) -> Result<FileQueue> {
        let defaults = FileQueue::default();
        let path = self.path.unwrap_or(defaults.path);
        FileQueue::validate_path(&path)?;

        Ok(FileQueue {
            path,
            lease_duration: self.lease_duration.unwrap_or(defaults.lease_duration),
        })
    }
}
