use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use aegis_common::{Signal, internal, logging, process::PidFile, tracing};
use aegis_delivery::{SmtpConfig, SmtpTransport, Worker, WorkerConfig};
use aegis_health::{HealthChecker, HealthConfig, HealthServer};
use aegis_ledger::{DeliveryLedger, LedgerConfig};
use aegis_notify::{WebhookConfig, WebhookNotifier};
use aegis_queue::{MessageQueue, QueueConfig};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::daemon::DaemonConfig;

/// The whole of `aegis.config.ron`
#[derive(Debug, Default, Deserialize)]
#[serde(rename = "Aegis")]
pub struct Aegis {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// How long the health server gets to drain after the worker stops
const HEALTH_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tracing::instrument(level = tracing::Level::TRACE)]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    // Wait for the worker to finish its delivery; a second CTRL+C abandons it
    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                internal!(level = WARN, "Forced shutdown, the current delivery is abandoned");
                break;
            }
        }
    }

    Ok(())
}

impl Aegis {
    /// Build the configured queue.
    ///
    /// # Errors
    ///
    /// Fails if the queue path is rejected or cannot be initialised.
    pub fn open_queue(&self) -> anyhow::Result<Arc<dyn MessageQueue>> {
        Ok(self.queue.clone().into_queue()?)
    }

    /// Open the failure ledger.
    ///
    /// # Errors
    ///
    /// Fails if the ledger directory cannot be created.
    pub fn open_ledger(&self) -> anyhow::Result<DeliveryLedger> {
        Ok(DeliveryLedger::from_config(&self.ledger)?)
    }

    /// A health checker over this configuration's queue, ledger and pid file.
    ///
    /// # Errors
    ///
    /// See [`Self::open_queue`] and [`Self::open_ledger`].
    pub fn health_checker(&self) -> anyhow::Result<HealthChecker> {
        Ok(
            HealthChecker::new(self.open_queue()?, self.open_ledger()?, self.health.max_queue_size)
                .with_pid_file(&self.daemon.pid_file),
        )
    }

    /// Run the delivery worker until SIGTERM or CTRL+C
    ///
    /// The pid file is held for the whole run. On shutdown the delivery in
    /// progress is finished and acknowledged before returning.
    ///
    /// # Errors
    ///
    /// This function will return an error if another worker owns the pid file,
    /// or if the queue, ledger, transport or health server cannot be set up.
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let pid_file = PidFile::acquire(&self.daemon.pid_file)?;
        internal!(
            level = INFO,
            "Controller running (pid {}, pid file {})",
            pid_file.pid(),
            pid_file.path().display()
        );

        let queue = self.open_queue()?;
        let ledger = self.open_ledger()?;
        let transport = Arc::new(SmtpTransport::new(&self.smtp)?);
        let notifier = Arc::new(WebhookNotifier::new(self.webhook.clone())?);

        if !notifier.is_configured() {
            internal!(level = INFO, "No webhook configured, outcomes are only logged");
        }

        let health = if self.health.enabled {
            let checker = HealthChecker::new(
                Arc::clone(&queue),
                ledger.clone(),
                self.health.max_queue_size,
            )
            .with_pid_file(&self.daemon.pid_file);

            let server = HealthServer::new(&self.health, Arc::new(checker)).await?;
            Some(tokio::spawn(server.serve(SHUTDOWN_BROADCAST.subscribe())))
        } else {
            None
        };

        let worker = Worker::new(queue, transport, ledger, notifier, self.worker);

        let ret = tokio::select! {
            r = worker.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");

        // The worker may have stopped on its own; make sure the server hears it
        let _ = SHUTDOWN_BROADCAST.send(Signal::Finalised);

        if let Some(handle) = health {
            match tokio::time::timeout(HEALTH_DRAIN_TIMEOUT, handle).await {
                Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Health server failed"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Health server task panicked"),
                Err(_) => tracing::warn!("Health server did not stop in time"),
                Ok(Ok(Ok(()))) => {}
            }
        }

        drop(pid_file);
        internal!(level = INFO, "Stopped");

        ret
    }
}
