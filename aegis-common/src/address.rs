//! Mailbox validation for outbound recipients
//!
//! Accepts the bare `local-part@domain` form used in send requests, following
//! the mailbox grammar of RFC 5321 Section 4.1.2:
//!
//! ```text
//! Mailbox        = Local-part "@" Domain
//! Local-part     = Dot-string
//! Dot-string     = Atom *("." Atom)
//! Atom           = 1*atext
//! Domain         = sub-domain 1*("." sub-domain)
//! sub-domain     = Let-dig [Ldh-str]
//! ```
//!
//! Quoted local-parts, address literals (`user@[192.0.2.1]`) and
//! single-label domains are rejected: the relay client cannot send to them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result type for mailbox parsing
pub type Result<T> = std::result::Result<T, AddressError>;

/// Errors that can occur while parsing a mailbox
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Empty address")]
    Empty,
    #[error("Address exceeds 254 octets")]
    TooLong,
    #[error("Local-part exceeds 64 octets")]
    LocalPartTooLong,
    #[error("Domain exceeds 253 octets")]
    DomainTooLong,
    #[error("Missing '@' separator in mailbox")]
    MissingAtSign,
    #[error("Invalid local-part: {0}")]
    InvalidLocalPart(String),
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
}

/// A validated mailbox (local-part@domain)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mailbox {
    /// The local part (before @)
    pub local_part: String,
    /// The domain (after @)
    pub domain: String,
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

impl std::str::FromStr for Mailbox {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self> {
        parse_mailbox(s)
    }
}

/// Parse and validate a bare mailbox.
///
/// Surrounding whitespace is ignored; anything else outside the grammar is an
/// error.
///
/// # Errors
///
/// Returns an [`AddressError`] describing the first violation found.
pub fn parse_mailbox(input: &str) -> Result<Mailbox> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(AddressError::Empty);
    }

    if trimmed.len() > 254 {
        return Err(AddressError::TooLong);
    }

    let at_pos = trimmed.rfind('@').ok_or(AddressError::MissingAtSign)?;
    let local_part = &trimmed[..at_pos];
    let domain = &trimmed[at_pos + 1..];

    if local_part.len() > 64 {
        return Err(AddressError::LocalPartTooLong);
    }
    if domain.len() > 253 {
        return Err(AddressError::DomainTooLong);
    }

    let local_part = parse_dot_string(local_part)?;

    let domain = parse_domain(domain)?;

    Ok(Mailbox { local_part, domain })
}

/// Convenience check for callers that only need a yes/no answer
#[must_use]
pub fn is_valid_mailbox(input: &str) -> bool {
    parse_mailbox(input).is_ok()
}

fn parse_dot_string(input: &str) -> Result<String> {
    if input.is_empty() {
        return Err(AddressError::InvalidLocalPart(
            "Empty local-part".to_string(),
        ));
    }

    if input.starts_with('"') {
        return Err(AddressError::InvalidLocalPart(
            "Quoted local-parts are not accepted".to_string(),
        ));
    }

    if input.starts_with('.') || input.ends_with('.') {
        return Err(AddressError::InvalidLocalPart(
            "Dot-string cannot start or end with '.'".to_string(),
        ));
    }

    if input.contains("..") {
        return Err(AddressError::InvalidLocalPart(
            "Dot-string cannot contain consecutive dots".to_string(),
        ));
    }

    if let Some(ch) = input.chars().find(|&ch| ch != '.' && !is_atext(ch)) {
        return Err(AddressError::InvalidLocalPart(format!(
            "Invalid character '{ch}' in atom"
        )));
    }

    Ok(input.to_string())
}

fn parse_domain(input: &str) -> Result<String> {
    if input.is_empty() {
        return Err(AddressError::InvalidDomain("Empty domain".to_string()));
    }

    if input.starts_with('[') {
        return Err(AddressError::InvalidDomain(
            "Address literals are not accepted".to_string(),
        ));
    }

    if input.starts_with('.') || input.ends_with('.') {
        return Err(AddressError::InvalidDomain(
            "Domain cannot start or end with '.'".to_string(),
        ));
    }

    if !input.contains('.') {
        return Err(AddressError::InvalidDomain(format!(
            "'{input}' is not a fully qualified domain"
        )));
    }

    for label in input.split('.') {
        parse_label(label)?;
    }

    Ok(input.to_ascii_lowercase())
}

/// sub-domain = Let-dig [Ldh-str]
fn parse_label(label: &str) -> Result<()> {
    if label.is_empty() {
        return Err(AddressError::InvalidDomain(
            "Domain cannot contain consecutive dots".to_string(),
        ));
    }

    if label.len() > 63 {
        return Err(AddressError::InvalidDomain(format!(
            "Label '{label}' exceeds 63 octets"
        )));
    }

    let bytes = label.as_bytes();
    if !bytes[0].is_ascii_alphanumeric() || !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return Err(AddressError::InvalidDomain(format!(
            "Label '{label}' must start and end with a letter or digit"
        )));
    }

    if let Some(ch) = label
        .chars()
        .find(|&ch| !ch.is_ascii_alphanumeric() && ch != '-')
    {
        return Err(AddressError::InvalidDomain(format!(
            "Invalid character '{ch}' in domain"
        )));
    }

    Ok(())
}

/// atext as defined in RFC 5322 Section 3.2.3
const fn is_atext(ch: char) -> bool {
    matches!(ch,
        'a'..='z' | 'A'..='Z' | '0'..='9' |
        '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '/' |
        '=' | '?' | '^' | '_' | '`' | '{' | '|' | '}' | '~'
    )
}
