use std::time::SystemTime;

use aegis_common::SendCommand;
use async_trait::async_trait;
use serde::Serialize;

use crate::{Lease, LeaseToken, MessageId, QueuedJob, Result};

/// Number of jobs in each state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub ready: usize,
    pub leased: usize,
    pub deferred: usize,
}

impl QueueStats {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.ready + self.leased + self.deferred
    }
}

/// A durable FIFO of send commands with lease-based claims.
///
/// Delivery is at-least-once: a claimed job that is not acknowledged before
/// its lease expires becomes visible again. Ordering among ready jobs is by
/// id (creation time) but is best effort; reclaimed and deferred jobs re-enter
/// under their original id.
#[async_trait]
pub trait MessageQueue: Send + Sync + std::fmt::Debug {
    /// Persist a new job for `command`, returning its id once it is durable.
    ///
    /// # Errors
    /// [`crate::QueueError::Unavailable`] if the job could not be stored.
    async fn enqueue(&self, command: SendCommand) -> Result<MessageId> {
        let job = QueuedJob::new(command);
        let id = job.id.clone();
        self.enqueue_job(job).await?;
        Ok(id)
    }

    /// Persist an already built job as ready.
    ///
    /// # Errors
    /// [`crate::QueueError::Unavailable`] if the job could not be stored.
    async fn enqueue_job(&self, job: QueuedJob) -> Result<()>;

    /// Claim the oldest ready job, if there is one. Never blocks waiting for
    /// work.
    ///
    /// Due deferred jobs and expired leases are made ready first. The claimed
    /// job's `attempts` has already been incremented.
    async fn consume(&self) -> Result<Option<Lease>>;

    /// Remove a claimed job permanently.
    ///
    /// # Errors
    /// [`crate::QueueError::LeaseLost`] if the lease expired and the job was
    /// reclaimed in the meantime.
    async fn ack(&self, token: &LeaseToken) -> Result<()>;

    /// Give a claimed job back, immediately visible to the next claimer.
    async fn nack(&self, token: &LeaseToken) -> Result<()>;

    /// Give a claimed job back, replacing it with `job` and keeping it hidden
    /// until `until`.
    async fn defer(&self, token: &LeaseToken, job: QueuedJob, until: SystemTime) -> Result<()>;

    /// Read a ready job without claiming it.
    async fn peek(&self, id: &MessageId) -> Result<Option<QueuedJob>>;

    /// Ids of every ready job, oldest first.
    async fn list(&self) -> Result<Vec<MessageId>>;

    /// Number of ready jobs.
    async fn len(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Count jobs in every state.
    async fn stats(&self) -> Result<QueueStats>;

    /// Check that the store is reachable and writable.
    async fn probe(&self) -> Result<()>;
}
