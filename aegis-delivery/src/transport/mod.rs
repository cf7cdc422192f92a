//! Outbound transports.
//!
//! The worker only sees the [`Transport`] trait. A transport owns its own
//! timeouts and reports every problem as a classified [`DeliveryError`].

pub mod sanitize;
mod smtp;

use std::fmt::Debug;

use aegis_common::SendCommand;
use async_trait::async_trait;
use serde::Serialize;

pub use smtp::{SmtpConfig, SmtpTransport, TlsMode};

use crate::DeliveryError;

/// What the relay told us about an accepted message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmtpReceipt {
    /// `Message-ID` header of the message as sent
    pub smtp_message_id: String,
    /// The relay's final reply, e.g. `250 OK: queued as 1A2B3C`
    pub response: String,
}

#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Deliver one message to the relay.
    ///
    /// # Errors
    /// Returns a permanent error for messages that can never be delivered and
    /// a temporary one when the relay could not be reached or asked us to
    /// come back later.
    async fn send(&self, command: &SendCommand) -> Result<SmtpReceipt, DeliveryError>;
}
