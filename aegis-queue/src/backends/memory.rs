use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;

use crate::{
    Lease, LeaseToken, MessageId, QueueError, QueuedJob, Result,
    queue::{MessageQueue, QueueStats},
    types::{now_millis, to_millis},
};

#[derive(Debug, Default)]
struct State {
    ready: BTreeMap<MessageId, QueuedJob>,
    /// Claimed jobs and their lease expiry (ms)
    leased: HashMap<MessageId, (QueuedJob, u64)>,
    /// Deferred jobs and the instant (ms) they become ready
    deferred: HashMap<MessageId, (QueuedJob, u64)>,
}

impl State {
    fn len(&self) -> usize {
        self.ready.len() + self.leased.len() + self.deferred.len()
    }

    fn release_due(&mut self, now_ms: u64) {
        let expired = self
            .leased
            .iter()
            .filter(|(_, (_, expires))| *expires <= now_ms)
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();

        for id in expired {
            if let Some((job, _)) = self.leased.remove(&id) {
                tracing::warn!(message_id = %id, "Lease expired, returning job to the queue");
                self.ready.insert(id, job);
            }
        }

        let due = self
            .deferred
            .iter()
            .filter(|(_, (_, due))| *due <= now_ms)
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();

        for id in due {
            if let Some((job, _)) = self.deferred.remove(&id) {
                self.ready.insert(id, job);
            }
        }
    }

    /// Remove the lease named by `token`, provided it is still the current one.
    fn take_lease(&mut self, token: &LeaseToken) -> Result<QueuedJob> {
        match self.leased.get(token.id()) {
            Some((_, expires)) if *expires == token.expires_at_ms() => self
                .leased
                .remove(token.id())
                .map(|(job, _)| job)
                .ok_or_else(|| QueueError::LeaseLost(token.id().clone())),
            _ => Err(QueueError::LeaseLost(token.id().clone())),
        }
    }
}

/// In-memory queue
///
/// Same lease semantics as the file queue, without durability. Intended for
/// tests and development. An optional capacity bounds the total number of
/// jobs held in any state.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    state: Arc<Mutex<State>>,
    lease_duration: Duration,
    capacity: Option<usize>,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            lease_duration: Duration::from_secs(300),
            capacity: None,
        }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    #[must_use]
    pub const fn lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn enqueue_job(&self, job: QueuedJob) -> Result<()> {
        let mut state = self.state.lock()?;

        if let Some(capacity) = self.capacity
            && state.len() >= capacity
        {
            return Err(QueueError::CapacityExceeded {
                len: state.len(),
                capacity,
            });
        }

        state.ready.insert(job.id.clone(), job);
        Ok(())
    }

    async fn consume(&self) -> Result<Option<Lease>> {
        let now_ms = now_millis();
        let mut state = self.state.lock()?;

        state.release_due(now_ms);

        let Some((id, mut job)) = state.ready.pop_first() else {
            return Ok(None);
        };

        job.attempts = job.attempts.saturating_add(1);
        let lease_ms = u64::try_from(self.lease_duration.as_millis()).unwrap_or(u64::MAX);
        let expires_ms = now_ms.saturating_add(lease_ms);

        state.leased.insert(id.clone(), (job.clone(), expires_ms));

        Ok(Some(Lease::new(job, LeaseToken::new(id, expires_ms))))
    }

    async fn ack(&self, token: &LeaseToken) -> Result<()> {
        self.state.lock()?.take_lease(token).map(drop)
    }

    async fn nack(&self, token: &LeaseToken) -> Result<()> {
        let mut state = self.state.lock()?;
        let job = state.take_lease(token)?;
        state.ready.insert(token.id().clone(), job);
        Ok(())
    }

    async fn defer(&self, token: &LeaseToken, job: QueuedJob, until: SystemTime) -> Result<()> {
        let mut state = self.state.lock()?;
        state.take_lease(token)?;
        state
            .deferred
            .insert(token.id().clone(), (job, to_millis(until)));
        Ok(())
    }

    async fn peek(&self, id: &MessageId) -> Result<Option<QueuedJob>> {
        Ok(self.state.lock()?.ready.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<MessageId>> {
        Ok(self.state.lock()?.ready.keys().cloned().collect())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state.lock()?;
        Ok(QueueStats {
            ready: state.ready.len(),
            leased: state.leased.len(),
            deferred: state.deferred.len(),
        })
    }

    async fn probe(&self) -> Result<()> {
        self.state.lock().map(drop).map_err(QueueError::from)
    }
}
