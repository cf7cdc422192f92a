#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::{sync::Arc, time::Duration};

use aegis_common::{SendCommand, Signal, ValidationError};
use aegis_delivery::{DeliveryOutcome, RetryPolicy, Worker, WorkerConfig};
use aegis_ledger::{DeliveryLedger, DeliveryStatus, LedgerConfig};
use aegis_notify::{NotificationStatus, RecordedNotification, RecordingSink};
use aegis_queue::{FileQueue, MessageQueue, QueuedJob};
use chrono::{Days, Utc};
use pretty_assertions::assert_eq;
use support::mock_transport::{ScriptedTransport, Step};
use tokio::sync::broadcast;

const TIMEOUT_ERROR: &str =
    "Temporary failure: Connection timed out: smtp.example.com:587 did not answer within 30s";

struct Harness {
    _dir: tempfile::TempDir,
    queue: Arc<dyn MessageQueue>,
    ledger: DeliveryLedger,
    sink: RecordingSink,
    transport: ScriptedTransport,
    worker: Worker,
}

fn harness(steps: impl IntoIterator<Item = Step>, config: WorkerConfig) -> Harness {
    harness_with_ledger(steps, config, None)
}

fn harness_with_ledger(
    steps: impl IntoIterator<Item = Step>,
    config: WorkerConfig,
    retention_days: Option<u32>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();

    let queue = FileQueue::builder()
        .path(dir.path().join("queue"))
        .build()
        .unwrap();
    queue.init().unwrap();
    let queue: Arc<dyn MessageQueue> = Arc::new(queue);

    let ledger = DeliveryLedger::from_config(&LedgerConfig {
        path: dir.path().join("ledger"),
        retention_days,
    })
    .unwrap();

    let sink = RecordingSink::new();
    let transport = ScriptedTransport::new(steps);

    let worker = Worker::new(
        Arc::clone(&queue),
        Arc::new(transport.clone()),
        ledger.clone(),
        Arc::new(sink.clone()),
        config,
    );

    Harness {
        _dir: dir,
        queue,
        ledger,
        sink,
        transport,
        worker,
    }
}

fn command(subject: &str) -> SendCommand {
    SendCommand::builder("alice@example.com", subject, "Hello")
        .build()
        .unwrap()
}

fn retrying(max_attempts: u32) -> WorkerConfig {
    WorkerConfig {
        retry: Some(RetryPolicy {
            max_attempts,
            base_retry_delay_secs: 0,
            max_retry_delay_secs: 0,
            retry_jitter_factor: 0.0,
        }),
        ..WorkerConfig::default()
    }
}

#[tokio::test]
async fn timeout_is_recorded_once_and_notified() {
    let h = harness([Step::Timeout], WorkerConfig::default());
    let id = h.queue.enqueue(command("Welcome")).await.unwrap();

    let report = h.worker.run_once().await.unwrap().expect("a job was ready");
    assert_eq!(report.message_id, id);
    assert!(matches!(
        &report.outcome,
        DeliveryOutcome::Failed { error, attempts: 1, .. } if error == TIMEOUT_ERROR
    ));

    // Today's partition holds exactly one record
    let today = Utc::now().date_naive();
    let stats = h.ledger.failure_stats(Some(today)).unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].count, 1);

    // The slow path finds it without a date
    let DeliveryStatus::Failed(record) = h.ledger.get_status(&id.to_string(), None).unwrap() else {
        panic!("failure should be recorded");
    };
    assert_eq!(record.attempts, 1);
    assert_eq!(record.last_error, TIMEOUT_ERROR);

    assert_eq!(
        h.sink.notifications(),
        vec![RecordedNotification {
            message_id: id.to_string(),
            status: NotificationStatus::Failed,
            error: Some(TIMEOUT_ERROR.to_string()),
            attempts: Some(1),
        }]
    );

    // Terminal per claim: the job is gone from the queue
    assert_eq!(h.queue.stats().await.unwrap().total(), 0);
}

#[tokio::test]
async fn success_leaves_no_trace_in_the_ledger() {
    let h = harness([Step::Accept], WorkerConfig::default());
    let id = h.queue.enqueue(command("Welcome")).await.unwrap();

    let report = h.worker.run_once().await.unwrap().unwrap();
    assert!(matches!(report.outcome, DeliveryOutcome::Sent { .. }));

    assert_eq!(
        h.ledger.get_status(&id.to_string(), None).unwrap(),
        DeliveryStatus::Sent
    );
    assert!(h.ledger.failure_stats(None).unwrap().is_empty());
    assert_eq!(h.sink.notifications()[0].status, NotificationStatus::Sent);
    assert!(h.queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn empty_queue_yields_nothing() {
    let h = harness([], WorkerConfig::default());
    assert!(h.worker.run_once().await.unwrap().is_none());
    assert!(h.transport.attempts().is_empty());
}

#[tokio::test]
async fn successful_resend_clears_the_earlier_failure() {
    let h = harness([Step::Accept], WorkerConfig::default());
    let today = Utc::now().date_naive();

    let mut job = QueuedJob::new(command("Invoice"));
    job.last_failed_on = Some(today);
    let id = job.id.to_string();

    h.ledger.record_failure(&id, "550 mailbox full", 1).unwrap();
    h.queue.enqueue_job(job).await.unwrap();

    h.worker.run_once().await.unwrap().unwrap();

    assert_eq!(
        h.ledger.get_status(&id, Some(today)).unwrap(),
        DeliveryStatus::Sent
    );
    assert!(
        !h.ledger
            .root()
            .join(format!("{}.json", today.format("%Y-%m-%d")))
            .exists()
    );
}

#[tokio::test]
async fn invalid_recipient_never_reaches_the_queue() {
    let h = harness([], WorkerConfig::default());

    let result = SendCommand::builder("not-an-address", "Hi", "Body").build();
    assert!(matches!(
        result,
        Err(ValidationError::InvalidAddress { field: "recipient", .. })
    ));

    assert!(h.queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn retry_policy_defers_temporary_failures() {
    let h = harness([Step::Timeout, Step::Timeout], retrying(2));
    let id = h.queue.enqueue(command("Welcome")).await.unwrap();

    let report = h.worker.run_once().await.unwrap().unwrap();
    assert!(matches!(
        report.outcome,
        DeliveryOutcome::Deferred { attempts: 1, .. }
    ));
    // Not terminal yet: nobody is told
    assert!(h.sink.notifications().is_empty());
    assert_eq!(h.queue.stats().await.unwrap().deferred, 1);

    let report = h.worker.run_once().await.unwrap().expect("deferred job is due");
    assert!(matches!(
        report.outcome,
        DeliveryOutcome::Failed { attempts: 2, .. }
    ));

    let DeliveryStatus::Failed(record) = h.ledger.get_status(&id.to_string(), None).unwrap() else {
        panic!("failure should be recorded");
    };
    assert_eq!(record.attempts, 2);

    let notifications = h.sink.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].attempts, Some(2));
    assert_eq!(h.queue.stats().await.unwrap().total(), 0);
}

#[tokio::test]
async fn retry_that_succeeds_clears_the_ledger() {
    let h = harness([Step::Timeout, Step::Accept], retrying(5));
    let id = h.queue.enqueue(command("Welcome")).await.unwrap();

    h.worker.run_once().await.unwrap().unwrap();
    assert!(matches!(
        h.ledger.get_status(&id.to_string(), None).unwrap(),
        DeliveryStatus::Failed(_)
    ));

    let report = h.worker.run_once().await.unwrap().unwrap();
    assert!(matches!(report.outcome, DeliveryOutcome::Sent { .. }));
    assert_eq!(
        h.ledger.get_status(&id.to_string(), None).unwrap(),
        DeliveryStatus::Sent
    );
    assert_eq!(
        h.sink
            .notifications()
            .iter()
            .map(|n| n.status)
            .collect::<Vec<_>>(),
        vec![NotificationStatus::Sent]
    );
}

#[tokio::test]
async fn retry_across_midnight_clears_the_previous_day() {
    let h = harness([Step::Timeout, Step::Accept], retrying(5));
    let yesterday = Utc::now().checked_sub_days(Days::new(1)).unwrap();

    let mut job = QueuedJob::new(command("Welcome"));
    job.last_failed_on = Some(yesterday.date_naive());
    let id = job.id.to_string();

    h.ledger
        .record_failure_at(&id, "timeout", 1, yesterday)
        .unwrap();
    h.queue.enqueue_job(job).await.unwrap();

    let report = h.worker.run_once().await.unwrap().unwrap();
    assert!(matches!(report.outcome, DeliveryOutcome::Deferred { .. }));
    assert_eq!(
        h.ledger
            .get_status(&id, Some(yesterday.date_naive()))
            .unwrap(),
        DeliveryStatus::Sent
    );

    let report = h.worker.run_once().await.unwrap().unwrap();
    assert!(matches!(report.outcome, DeliveryOutcome::Sent { .. }));
    assert_eq!(h.ledger.get_status(&id, None).unwrap(), DeliveryStatus::Sent);
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let h = harness([Step::Reject("550 5.1.1 User unknown")], retrying(5));
    h.queue.enqueue(command("Welcome")).await.unwrap();

    let report = h.worker.run_once().await.unwrap().unwrap();
    assert!(matches!(
        report.outcome,
        DeliveryOutcome::Failed { ref error, attempts: 1, .. } if error.contains("User unknown")
    ));
    assert!(h.queue.is_empty().await.unwrap());
    assert_eq!(h.transport.attempts().len(), 1);
}

#[tokio::test]
async fn ledger_errors_do_not_stop_delivery() {
    let h = harness([Step::Timeout, Step::Accept], WorkerConfig::default());

    // Replace the ledger directory with a plain file
    std::fs::remove_dir_all(h.ledger.root()).unwrap();
    std::fs::write(h.ledger.root(), b"").unwrap();

    h.queue.enqueue(command("First")).await.unwrap();
    let report = h.worker.run_once().await.unwrap().unwrap();
    assert!(matches!(report.outcome, DeliveryOutcome::Failed { .. }));
    assert_eq!(h.sink.notifications().len(), 1);

    h.queue.enqueue(command("Second")).await.unwrap();
    let report = h.worker.run_once().await.unwrap().unwrap();
    assert!(matches!(report.outcome, DeliveryOutcome::Sent { .. }));
    assert!(h.queue.is_empty().await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_lets_the_current_delivery_finish() {
    let h = harness(
        [Step::SlowAccept(Duration::from_millis(300))],
        WorkerConfig {
            poll_interval_ms: 20,
            ..WorkerConfig::default()
        },
    );
    h.queue.enqueue(command("First")).await.unwrap();
    h.queue.enqueue(command("Second")).await.unwrap();

    let (tx, rx) = broadcast::channel(4);
    let worker = h.worker.clone();
    let serve = tokio::spawn(async move { worker.serve(rx).await });

    // Let the first delivery get under way, then ask to stop
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(Signal::Shutdown).unwrap();

    tokio::time::timeout(Duration::from_secs(5), serve)
        .await
        .expect("worker should stop")
        .unwrap()
        .unwrap();

    assert_eq!(h.transport.attempts().len(), 1);
    assert_eq!(h.sink.notifications().len(), 1);
    assert_eq!(h.queue.len().await.unwrap(), 1);
}

#[tokio::test]
async fn idle_worker_stops_promptly() {
    let h = harness(
        [],
        WorkerConfig {
            poll_interval_ms: 60_000,
            ..WorkerConfig::default()
        },
    );

    let (tx, rx) = broadcast::channel(4);
    let worker = h.worker.clone();
    let serve = tokio::spawn(async move { worker.serve(rx).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(Signal::Shutdown).unwrap();

    tokio::time::timeout(Duration::from_secs(2), serve)
        .await
        .expect("shutdown should interrupt the idle sleep")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn worker_applies_ledger_retention_on_start() {
    let h = harness_with_ledger([], WorkerConfig::default(), Some(7));

    let long_ago = Utc::now().checked_sub_days(Days::new(30)).unwrap();
    h.ledger
        .record_failure_at("01HZOLD", "421 try later", 1, long_ago)
        .unwrap();
    h.ledger.record_failure("01HZNEW", "421 try later", 1).unwrap();

    let (tx, rx) = broadcast::channel(4);
    let worker = h.worker.clone();
    let serve = tokio::spawn(async move { worker.serve(rx).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(Signal::Shutdown).unwrap();
    serve.await.unwrap().unwrap();

    let stats = h.ledger.failure_stats(None).unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].failures[0].message_id, "01HZNEW");
}
