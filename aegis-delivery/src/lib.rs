//! Delivery side of the pipeline: the [`Worker`] that drains the queue, the
//! [`Transport`] it hands messages to, and the opt-in [`RetryPolicy`].

mod error;
mod policy;
pub mod transport;
mod worker;

pub use error::{DeliveryError, PermanentError, SystemError, TemporaryError};
pub use policy::RetryPolicy;
pub use transport::{SmtpConfig, SmtpReceipt, SmtpTransport, TlsMode, Transport};
pub use worker::{DeliveryOutcome, DeliveryReport, Worker, WorkerConfig};
