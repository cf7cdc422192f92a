//! The claim → deliver → acknowledge loop.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use aegis_common::{Signal, internal};
use aegis_ledger::{DeliveryLedger, LedgerError};
use aegis_notify::NotificationSink;
use aegis_queue::{LeaseToken, MessageId, MessageQueue, QueueError, QueuedJob};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::instrument;

use crate::{DeliveryError, RetryPolicy, SystemError, Transport};

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_prune_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkerConfig {
    /// How long to sleep when the queue is empty (in milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Retry temporary failures in place instead of recording them at once.
    ///
    /// Default: disabled, every claim is terminal
    #[serde(default)]
    pub retry: Option<RetryPolicy>,

    /// How often ledger retention is applied (in seconds)
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            retry: None,
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

/// Terminal (or deferred) result of one claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent {
        smtp_message_id: String,
    },
    Failed {
        error: String,
        attempts: u32,
        failed_at: DateTime<Utc>,
    },
    /// A temporary failure that will be tried again at `retry_at`
    Deferred {
        error: String,
        attempts: u32,
        retry_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub message_id: MessageId,
    pub outcome: DeliveryOutcome,
}

/// Delivers queued jobs one at a time.
///
/// Any number of workers may share a queue and ledger; the queue lease is
/// the only mutual exclusion between them.
#[derive(Debug, Clone)]
pub struct Worker {
    queue: Arc<dyn MessageQueue>,
    transport: Arc<dyn Transport>,
    ledger: DeliveryLedger,
    sink: Arc<dyn NotificationSink>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        transport: Arc<dyn Transport>,
        ledger: DeliveryLedger,
        sink: Arc<dyn NotificationSink>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            transport,
            ledger,
            sink,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claim and process at most one job.
    ///
    /// Returns `Ok(None)` when nothing was ready. Ledger and notification
    /// problems are logged, never returned: once a job has been claimed its
    /// outcome is always reported.
    ///
    /// # Errors
    /// Returns the queue error if claiming failed.
    pub async fn run_once(&self) -> Result<Option<DeliveryReport>, QueueError> {
        let Some(lease) = self.queue.consume().await? else {
            return Ok(None);
        };

        let (job, token) = lease.into_parts();
        let message_id = job.id.clone();

        let outcome = self.deliver(job, &token).await;

        Ok(Some(DeliveryReport {
            message_id,
            outcome,
        }))
    }

    #[instrument(level = "debug", skip_all, fields(message_id = %job.id, attempts = job.attempts))]
    async fn deliver(&self, job: QueuedJob, token: &LeaseToken) -> DeliveryOutcome {
        internal!("Delivering {} (attempt {})", job.id, job.attempts);

        let started = Instant::now();
        match self.transport.send(&job.command).await {
            Ok(receipt) => {
                tracing::info!(
                    message_id = %job.id,
                    smtp_message_id = %receipt.smtp_message_id,
                    attempts = job.attempts,
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Email sent successfully"
                );

                self.acknowledge(token).await;

                if let Some(date) = job.last_failed_on {
                    let id = job.id.to_string();
                    match self
                        .ledger_call(move |ledger| ledger.remove_success(&id, date))
                        .await
                    {
                        Ok(true) => internal!("Cleared earlier failure of {} on {date}", job.id),
                        Ok(false) => {}
                        Err(e) => tracing::error!(
                            message_id = %job.id,
                            error = %e,
                            "Failed to clear ledger record after successful retry"
                        ),
                    }
                }

                self.sink.notify_success(&job.id.to_string()).await;

                DeliveryOutcome::Sent {
                    smtp_message_id: receipt.smtp_message_id,
                }
            }
            Err(error) => self.handle_failure(job, token, &error).await,
        }
    }

    async fn handle_failure(
        &self,
        mut job: QueuedJob,
        token: &LeaseToken,
        error: &DeliveryError,
    ) -> DeliveryOutcome {
        let message_id = job.id.to_string();
        let error_text = error.to_string();
        let attempts = job.attempts;

        let record = {
            let id = message_id.clone();
            let text = error_text.clone();
            self.ledger_call(move |ledger| ledger.record_failure(&id, &text, attempts))
                .await
        };

        let failed_at = match record {
            Ok(record) => {
                let failed_on = record.failed_at.date_naive();

                // A retry that crossed midnight leaves the old partition's record behind
                if let Some(previous) = job.last_failed_on
                    && previous != failed_on
                {
                    let id = message_id.clone();
                    if let Err(e) = self
                        .ledger_call(move |ledger| ledger.remove_success(&id, previous))
                        .await
                    {
                        tracing::warn!(
                            message_id = %message_id,
                            date = %previous,
                            error = %e,
                            "Failed to clear superseded failure record"
                        );
                    }
                }

                job.last_failed_on = Some(failed_on);
                record.failed_at
            }
            Err(e) => {
                tracing::error!(
                    message_id = %message_id,
                    error = %e,
                    "Failed to record delivery failure in the ledger"
                );
                Utc::now()
            }
        };

        if let Some(policy) = &self.config.retry
            && error.is_temporary()
            && policy.should_retry(attempts)
        {
            let retry_at = policy.next_retry_at(attempts);

            match self.queue.defer(token, job, retry_at).await {
                Ok(()) => {
                    let retry_at = DateTime::<Utc>::from(retry_at);
                    tracing::warn!(
                        message_id = %message_id,
                        attempts,
                        error = %error_text,
                        retry_at = %retry_at,
                        "Delivery failed temporarily, retrying later"
                    );
                    return DeliveryOutcome::Deferred {
                        error: error_text,
                        attempts,
                        retry_at,
                    };
                }
                Err(e) => {
                    // The lease is gone: another worker owns the job now
                    tracing::error!(message_id = %message_id, error = %e, "Failed to defer job");
                    return DeliveryOutcome::Failed {
                        error: error_text,
                        attempts,
                        failed_at,
                    };
                }
            }
        }

        self.acknowledge(token).await;
        self.sink
            .notify_failure(&message_id, &error_text, attempts)
            .await;

        DeliveryOutcome::Failed {
            error: error_text,
            attempts,
            failed_at,
        }
    }

    async fn acknowledge(&self, token: &LeaseToken) {
        if let Err(e) = self.queue.ack(token).await {
            tracing::error!(
                message_id = %token.id(),
                error = %e,
                "Failed to acknowledge job, it will be redelivered after the lease expires"
            );
        }
    }

    /// Ledger access is blocking file I/O; keep it off the async workers.
    async fn ledger_call<T, F>(&self, call: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&DeliveryLedger) -> Result<T, LedgerError> + Send + 'static,
    {
        let ledger = self.ledger.clone();
        tokio::task::spawn_blocking(move || call(&ledger))
            .await
            .map_err(|e| LedgerError::Io {
                path: self.ledger.root().to_path_buf(),
                source: std::io::Error::other(e),
            })?
    }

    async fn prune(&self) {
        if self.ledger.retention_days().is_none() {
            return;
        }

        if let Err(e) = self.ledger_call(DeliveryLedger::prune_expired).await {
            tracing::warn!(error = %e, "Failed to prune delivery ledger");
        }
    }

    /// Run until a shutdown signal arrives.
    ///
    /// The signal is only observed between jobs: a delivery in progress is
    /// always allowed to finish and be acknowledged.
    ///
    /// # Errors
    /// Returns an error if the shutdown channel is closed unexpectedly.
    pub async fn serve(
        &self,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), DeliveryError> {
        internal!(level = INFO, "Delivery worker starting");

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let prune_interval = Duration::from_secs(self.config.prune_interval_secs.max(1));

        self.prune().await;
        let mut last_prune = Instant::now();

        loop {
            match shutdown.try_recv() {
                Ok(Signal::Shutdown | Signal::Finalised) => break,
                Err(TryRecvError::Closed) => {
                    return Err(SystemError::Internal(
                        "Shutdown channel closed unexpectedly".to_string(),
                    )
                    .into());
                }
                Err(TryRecvError::Empty | TryRecvError::Lagged(_)) => {}
            }

            if last_prune.elapsed() >= prune_interval {
                self.prune().await;
                last_prune = Instant::now();
            }

            let idle = match self.run_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim from the queue");
                    true
                }
            };

            if idle {
                tokio::select! {
                    () = tokio::time::sleep(poll_interval) => {}
                    sig = shutdown.recv() => match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(SystemError::Internal(
                                "Shutdown channel closed unexpectedly".to_string(),
                            )
                            .into());
                        }
                    },
                }
            }
        }

        internal!(level = INFO, "Delivery worker stopped");
        Ok(())
    }
}
