use thiserror::Error;

use crate::address::AddressError;

/// A send request that cannot be turned into a [`crate::SendCommand`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid {field} address '{address}': {source}")]
    InvalidAddress {
        field: &'static str,
        address: String,
        #[source]
        source: AddressError,
    },

    #[error("Priority must be between 1 and 5, got {0}")]
    InvalidPriority(u8),

    #[error("Invalid header name '{0}'")]
    InvalidHeaderName(String),

    #[error("Header '{0}' contains a line break")]
    InvalidHeaderValue(String),

    #[error("Attachment {0} has no file name")]
    UnnamedAttachment(usize),

    #[error("Invalid attachment encoding for '{name}': {reason}")]
    AttachmentEncoding { name: String, reason: String },
}

impl ValidationError {
    pub(crate) fn address(field: &'static str, address: &str, source: AddressError) -> Self {
        Self::InvalidAddress {
            field,
            address: address.to_string(),
            source,
        }
    }
}
