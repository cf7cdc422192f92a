//! Health check logic

use std::{path::PathBuf, sync::Arc};

use aegis_common::process::{self, ProcessState};
use aegis_ledger::DeliveryLedger;
use aegis_queue::MessageQueue;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Healthy,
    /// Working, but needs attention
    Warning,
    Unhealthy,
}

/// Overall status of a [`HealthReport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub status: CheckStatus,
    pub message: String,
}

impl Check {
    fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Healthy,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Warning,
            message: message.into(),
        }
    }

    fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Unhealthy,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checks {
    /// Queue reachable and backlog below the configured maximum
    pub queue: Check,
    /// Queue storage writable
    pub queue_storage: Check,
    /// Worker process alive according to its pid file
    pub worker: Check,
    /// Ledger directory writable
    pub ledger_storage: Check,
}

impl Checks {
    fn iter(&self) -> impl Iterator<Item = &Check> {
        [
            &self.queue,
            &self.queue_storage,
            &self.worker,
            &self.ledger_storage,
        ]
        .into_iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub checks: Checks,
}

impl HealthReport {
    fn new(checks: Checks) -> Self {
        let status = if checks
            .iter()
            .any(|check| check.status == CheckStatus::Unhealthy)
        {
            HealthStatus::Unhealthy
        } else if checks
            .iter()
            .any(|check| check.status == CheckStatus::Warning)
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION"),
            checks,
        }
    }

    /// Whether the pipeline can take work: nothing is unhealthy
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

/// Probes the pipeline's shared state on demand.
///
/// Nothing is cached: every [`report`](Self::report) touches the queue and
/// ledger directories, so it works the same from inside the worker and from
/// a separate `aegis health` invocation.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    queue: Arc<dyn MessageQueue>,
    ledger: DeliveryLedger,
    pid_file: Option<PathBuf>,
    max_queue_size: usize,
}

impl HealthChecker {
    #[must_use]
    pub fn new(queue: Arc<dyn MessageQueue>, ledger: DeliveryLedger, max_queue_size: usize) -> Self {
        Self {
            queue,
            ledger,
            pid_file: None,
            max_queue_size,
        }
    }

    /// Check worker liveness through the pid file at `path`
    #[must_use]
    pub fn with_pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    /// The process answering is alive by definition.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        true
    }

    /// Run every check.
    pub async fn report(&self) -> HealthReport {
        let report = HealthReport::new(Checks {
            queue: self.check_queue().await,
            queue_storage: self.check_queue_storage().await,
            worker: self.check_worker(),
            ledger_storage: self.check_ledger_storage().await,
        });

        if report.status == HealthStatus::Unhealthy {
            tracing::warn!(
                queue = ?report.checks.queue.status,
                queue_storage = ?report.checks.queue_storage.status,
                worker = ?report.checks.worker.status,
                ledger_storage = ?report.checks.ledger_storage.status,
                "Health check failed"
            );
        }

        report
    }

    async fn check_queue(&self) -> Check {
        match self.queue.stats().await {
            Ok(stats) if stats.total() >= self.max_queue_size => Check::warning(format!(
                "Queue backlog of {} jobs exceeds {} ({} ready, {} leased, {} deferred)",
                stats.total(),
                self.max_queue_size,
                stats.ready,
                stats.leased,
                stats.deferred
            )),
            Ok(stats) => Check::healthy(format!(
                "Queue operational ({} ready, {} leased, {} deferred)",
                stats.ready, stats.leased, stats.deferred
            )),
            Err(e) => Check::unhealthy(format!("Queue system error: {e}")),
        }
    }

    async fn check_queue_storage(&self) -> Check {
        match self.queue.probe().await {
            Ok(()) => Check::healthy("Queue storage writable"),
            Err(e) => Check::unhealthy(format!("Queue storage not writable: {e}")),
        }
    }

    fn check_worker(&self) -> Check {
        let Some(path) = &self.pid_file else {
            return Check::warning("No pid file configured, worker liveness unknown");
        };

        match process::inspect(path) {
            Ok(ProcessState::Running(pid)) => Check::healthy(format!("Worker running (pid {pid})")),
            Ok(ProcessState::Stale(pid)) => Check::unhealthy(format!(
                "Worker not running, stale pid file {} names pid {pid}",
                path.display()
            )),
            Ok(ProcessState::NotRunning) => Check::unhealthy("Worker not running"),
            Err(e) => Check::unhealthy(format!("Cannot read worker pid file: {e}")),
        }
    }

    async fn check_ledger_storage(&self) -> Check {
        let ledger = self.ledger.clone();
        let probe = tokio::task::spawn_blocking(move || ledger.probe()).await;

        match probe {
            Ok(Ok(())) => Check::healthy("Ledger storage writable"),
            Ok(Err(e)) => Check::unhealthy(format!("Ledger storage not writable: {e}")),
            Err(e) => Check::unhealthy(format!("Ledger probe did not complete: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(status: CheckStatus) -> Check {
        Check {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn test_overall_status_is_worst_check() {
        let all = |status| Checks {
            queue: check(status),
            queue_storage: check(status),
            worker: check(status),
            ledger_storage: check(status),
        };

        assert_eq!(HealthReport::new(all(CheckStatus::Healthy)).status, HealthStatus::Healthy);

        let degraded = HealthReport::new(Checks {
            worker: check(CheckStatus::Warning),
            ..all(CheckStatus::Healthy)
        });
        assert_eq!(degraded.status, HealthStatus::Degraded);
        assert!(degraded.is_ready());

        let unhealthy = HealthReport::new(Checks {
            worker: check(CheckStatus::Warning),
            ledger_storage: check(CheckStatus::Unhealthy),
            ..all(CheckStatus::Healthy)
        });
        assert_eq!(unhealthy.status, HealthStatus::Unhealthy);
        assert!(!unhealthy.is_ready());
    }

    #[test]
    fn test_report_serializes_lowercase() {
        let report = HealthReport::new(Checks {
            queue: check(CheckStatus::Healthy),
            queue_storage: check(CheckStatus::Healthy),
            worker: check(CheckStatus::Warning),
            ledger_storage: check(CheckStatus::Healthy),
        });

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["checks"]["worker"]["status"], "warning");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }
}
