//! Typed errors for delivery attempts.
//!
//! Failures are split the same way an SMTP server splits its replies:
//! - Permanent failures (5xx replies, unbuildable messages) never succeed on retry
//! - Temporary failures (4xx replies, network trouble) may succeed later
//! - System errors are problems on our side (configuration, internal bugs)

use thiserror::Error;

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    #[error("System error: {0}")]
    System(#[from] SystemError),
}

#[derive(Debug, Error)]
pub enum PermanentError {
    /// An address could not be turned into a mailbox
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// The relay refused the message with a 5xx reply
    #[error("Message rejected: {0}")]
    MessageRejected(String),

    /// The MIME message could not be assembled
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

#[derive(Debug, Error)]
pub enum TemporaryError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timed out: {0}")]
    Timeout(String),

    /// The relay answered with a 4xx reply
    #[error("Temporary SMTP error: {0}")]
    SmtpTemporary(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),
}

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Returns `true` if this error is temporary and may be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}

/// Classify an error from the lettre SMTP client.
///
/// - **5xx replies** → Permanent
/// - **4xx replies** → Temporary
/// - **Timeouts, TLS and connection errors** → Temporary
/// - **Client-side protocol errors** → System
impl From<lettre::transport::smtp::Error> for DeliveryError {
    fn from(error: lettre::transport::smtp::Error) -> Self {
        let message = error.to_string();

        if error.is_permanent() {
            Self::Permanent(PermanentError::MessageRejected(message))
        } else if error.is_transient() {
            Self::Temporary(TemporaryError::SmtpTemporary(message))
        } else if error.is_timeout() {
            Self::Temporary(TemporaryError::Timeout(message))
        } else if error.is_tls() {
            Self::Temporary(TemporaryError::TlsHandshakeFailed(message))
        } else if error.is_client() {
            Self::System(SystemError::Internal(message))
        } else {
            Self::Temporary(TemporaryError::ConnectionFailed(message))
        }
    }
}

impl From<lettre::address::AddressError> for DeliveryError {
    fn from(error: lettre::address::AddressError) -> Self {
        Self::Permanent(PermanentError::InvalidRecipient(error.to_string()))
    }
}

impl From<lettre::error::Error> for DeliveryError {
    fn from(error: lettre::error::Error) -> Self {
        Self::Permanent(PermanentError::InvalidMessage(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let error = DeliveryError::Temporary(TemporaryError::Timeout("smtp.example.com".into()));
        assert!(error.is_temporary());
        assert!(!error.is_permanent());
        assert!(!error.is_system());

        let error = DeliveryError::Permanent(PermanentError::InvalidRecipient("x".into()));
        assert!(error.is_permanent());

        let error = DeliveryError::System(SystemError::Configuration("x".into()));
        assert!(error.is_system());
    }

    #[test]
    fn test_error_display() {
        let error = DeliveryError::Temporary(TemporaryError::Timeout(
            "no reply within 30s".to_string(),
        ));
        assert_eq!(
            error.to_string(),
            "Temporary failure: Connection timed out: no reply within 30s"
        );
    }

    #[test]
    fn test_address_errors_are_permanent() {
        let error = "not an address"
            .parse::<lettre::Address>()
            .map_err(DeliveryError::from)
            .unwrap_err();
        assert!(error.is_permanent());
    }
}
