//! Delivery outcome notifications.
//!
//! The worker reports every terminal outcome through a [`NotificationSink`].
//! Sinks are best effort: they never report failure to the caller, so a
//! broken webhook endpoint cannot stall delivery.

mod error;
mod payload;
mod sink;
mod webhook;

pub use error::NotifyError;
pub use payload::{NotificationStatus, WebhookPayload};
pub use sink::{NotificationSink, NullSink, RecordedNotification, RecordingSink};
pub use webhook::{SIGNATURE_HEADER, WebhookConfig, WebhookNotifier, sign};
