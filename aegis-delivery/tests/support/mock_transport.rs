//! Scripted transports for driving the worker without a relay.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use aegis_common::SendCommand;
use aegis_delivery::{
    DeliveryError, PermanentError, SmtpReceipt, TemporaryError, Transport,
};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub enum Step {
    Accept,
    Timeout,
    Reject(&'static str),
    /// Accept after a pause, to hold a delivery in flight
    SlowAccept(Duration),
}

/// Replays `steps` in order; once exhausted every send is accepted.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    steps: Arc<Mutex<VecDeque<Step>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into_iter().collect())),
            sent: Arc::default(),
        }
    }

    /// Subjects of every message handed to the transport, in order
    pub fn attempts(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, command: &SendCommand) -> Result<SmtpReceipt, DeliveryError> {
        self.sent.lock().unwrap().push(command.subject().to_string());
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Accept);

        match step {
            Step::Accept => {}
            Step::SlowAccept(pause) => tokio::time::sleep(pause).await,
            Step::Timeout => {
                return Err(TemporaryError::Timeout(
                    "smtp.example.com:587 did not answer within 30s".to_string(),
                )
                .into());
            }
            Step::Reject(reason) => {
                return Err(PermanentError::MessageRejected(reason.to_string()).into());
            }
        }

        Ok(SmtpReceipt {
            smtp_message_id: format!("<{}@example.com>", ulid::Ulid::new()),
            response: "250 OK".to_string(),
        })
    }
}
