use std::{
    fmt::Debug,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;

use crate::NotificationStatus;

/// Receiver of terminal delivery outcomes.
///
/// Both calls are fire-and-forget: implementations log their own failures
/// and never propagate them.
#[async_trait]
pub trait NotificationSink: Send + Sync + Debug {
    async fn notify_success(&self, message_id: &str);

    async fn notify_failure(&self, message_id: &str, error: &str, attempts: u32);
}

/// Sink for deployments without a webhook
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn notify_success(&self, _message_id: &str) {}

    async fn notify_failure(&self, _message_id: &str, _error: &str, _attempts: u32) {}
}

/// A notification captured by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedNotification {
    pub message_id: String,
    pub status: NotificationStatus,
    pub error: Option<String>,
    pub attempts: Option<u32>,
}

/// Sink that keeps every notification in memory, for tests
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    notifications: Arc<Mutex<Vec<RecordedNotification>>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far, in order
    #[must_use]
    pub fn notifications(&self) -> Vec<RecordedNotification> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, notification: RecordedNotification) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify_success(&self, message_id: &str) {
        self.push(RecordedNotification {
            message_id: message_id.to_string(),
            status: NotificationStatus::Sent,
            error: None,
            attempts: None,
        });
    }

    async fn notify_failure(&self, message_id: &str, error: &str, attempts: u32) {
        self.push(RecordedNotification {
            message_id: message_id.to_string(),
            status: NotificationStatus::Failed,
            error: Some(error.to_string()),
            attempts: Some(attempts),
        });
    }
}
