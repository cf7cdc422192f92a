//! The unit of work accepted by the dispatcher.
//!
//! [`SendRequest`] is the loose wire shape a producer submits (camelCase JSON,
//! attachment bodies base64 encoded). [`SendCommand`] is the validated,
//! immutable form that travels through the queue; the only way to obtain one
//! is through [`SendCommand::validate`] or [`SendCommandBuilder::build`], and
//! deserialising a `SendCommand` re-runs the same validation.

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::{address::parse_mailbox, error::ValidationError};

/// Message priority, 1 (highest) through 5 (lowest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const HIGH: Self = Self(1);
    pub const NORMAL: Self = Self(3);
    pub const LOW: Self = Self(5);

    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPriority`] outside of `1..=5`.
    pub const fn new(value: u8) -> Result<Self, ValidationError> {
        if value >= 1 && value <= 5 {
            Ok(Self(value))
        } else {
            Err(ValidationError::InvalidPriority(value))
        }
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl TryFrom<u8> for Priority {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

/// An additional recipient (cc or bcc)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Recipient {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A decoded attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Replace each recipient's address with its canonical `local@domain` form
fn normalize_recipients(
    field: &'static str,
    recipients: Vec<Recipient>,
) -> Result<Vec<Recipient>, ValidationError> {
    recipients
        .into_iter()
        .map(|recipient| {
            let mailbox = parse_mailbox(&recipient.email)
                .map_err(|e| ValidationError::address(field, &recipient.email, e))?;
            Ok(Recipient {
                email: mailbox.to_string(),
                ..recipient
            })
        })
        .collect()
}

/// Attachment as it appears on the wire, with a base64 body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedAttachment {
    pub name: String,
    pub content: String,
}

impl From<&Attachment> for EncodedAttachment {
    fn from(attachment: &Attachment) -> Self {
        Self {
            name: attachment.name.clone(),
            content: STANDARD.encode(&attachment.content),
        }
    }
}

const fn default_priority() -> u8 {
    3
}

/// Unvalidated send request as submitted by a producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_name: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_html: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<Recipient>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<Recipient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<EncodedAttachment>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_priority")]
    pub priority: u8,
}

/// A validated, immutable request to send one email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SendRequest", into = "SendRequest")]
pub struct SendCommand {
    to: String,
    to_name: Option<String>,
    subject: String,
    body: String,
    is_html: bool,
    cc: Vec<Recipient>,
    bcc: Vec<Recipient>,
    reply_to: Option<String>,
    attachments: Vec<Attachment>,
    headers: BTreeMap<String, String>,
    priority: Priority,
}

impl SendCommand {
    /// Start building a command for a single recipient
    pub fn builder(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> SendCommandBuilder {
        SendCommandBuilder::new(to, subject, body)
    }

    /// Validate a raw request.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found: an unparseable address
    /// (`to`, cc, bcc, reply-to), an out of range priority, a header that could
    /// break the message framing, or an attachment that is unnamed or not valid
    /// base64.
    pub fn validate(request: SendRequest) -> Result<Self, ValidationError> {
        let SendRequest {
            to,
            to_name,
            subject,
            body,
            is_html,
            cc,
            bcc,
            reply_to,
            attachments,
            headers,
            priority,
        } = request;

        let to = parse_mailbox(&to)
            .map_err(|e| ValidationError::address("recipient", &to, e))?
            .to_string();

        let cc = normalize_recipients("cc", cc)?;
        let bcc = normalize_recipients("bcc", bcc)?;

        let reply_to = reply_to
            .map(|reply_to| {
                parse_mailbox(&reply_to)
                    .map(|mailbox| mailbox.to_string())
                    .map_err(|e| ValidationError::address("reply-to", &reply_to, e))
            })
            .transpose()?;

        for (name, value) in &headers {
            validate_header(name, value)?;
        }

        let attachments = attachments
            .into_iter()
            .enumerate()
            .map(|(index, encoded)| {
                if encoded.name.trim().is_empty() {
                    return Err(ValidationError::UnnamedAttachment(index));
                }

                let content = STANDARD.decode(encoded.content.as_bytes()).map_err(|e| {
                    ValidationError::AttachmentEncoding {
                        name: encoded.name.clone(),
                        reason: e.to_string(),
                    }
                })?;

                Ok(Attachment {
                    name: encoded.name,
                    content,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            to,
            to_name,
            subject,
            body,
            is_html,
            cc,
            bcc,
            reply_to,
            attachments,
            headers,
            priority: Priority::new(priority)?,
        })
    }

    #[must_use]
    pub fn to(&self) -> &str {
        &self.to
    }

    #[must_use]
    pub fn to_name(&self) -> Option<&str> {
        self.to_name.as_deref()
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    #[must_use]
    pub const fn is_html(&self) -> bool {
        self.is_html
    }

    #[must_use]
    pub fn cc(&self) -> &[Recipient] {
        &self.cc
    }

    #[must_use]
    pub fn bcc(&self) -> &[Recipient] {
        &self.bcc
    }

    #[must_use]
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    #[must_use]
    pub const fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }
}

impl TryFrom<SendRequest> for SendCommand {
    type Error = ValidationError;

    fn try_from(request: SendRequest) -> Result<Self, Self::Error> {
        Self::validate(request)
    }
}

impl From<SendCommand> for SendRequest {
    fn from(command: SendCommand) -> Self {
        Self {
            attachments: command
                .attachments
                .iter()
                .map(EncodedAttachment::from)
                .collect(),
            to: command.to,
            to_name: command.to_name,
            subject: command.subject,
            body: command.body,
            is_html: command.is_html,
            cc: command.cc,
            bcc: command.bcc,
            reply_to: command.reply_to,
            headers: command.headers,
            priority: command.priority.get(),
        }
    }
}

/// Header names are printable ASCII without ':' (RFC 5322 ftext), values may
/// not contain CR or LF.
fn validate_header(name: &str, value: &str) -> Result<(), ValidationError> {
    if name.is_empty() || !name.bytes().all(|b| (33..=126).contains(&b) && b != b':') {
        return Err(ValidationError::InvalidHeaderName(name.to_string()));
    }

    if value.contains(['\r', '\n']) {
        return Err(ValidationError::InvalidHeaderValue(name.to_string()));
    }

    Ok(())
}

/// Fluent construction of a [`SendCommand`]
#[derive(Debug, Clone)]
pub struct SendCommandBuilder {
    request: SendRequest,
    attachments: Vec<Attachment>,
}

impl SendCommandBuilder {
    fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            request: SendRequest {
                to: to.into(),
                to_name: None,
                subject: subject.into(),
                body: body.into(),
                is_html: false,
                cc: Vec::new(),
                bcc: Vec::new(),
                reply_to: None,
                attachments: Vec::new(),
                headers: BTreeMap::new(),
                priority: default_priority(),
            },
            attachments: Vec::new(),
        }
    }

    #[must_use]
    pub fn to_name(mut self, name: impl Into<String>) -> Self {
        self.request.to_name = Some(name.into());
        self
    }

    #[must_use]
    pub const fn html(mut self, is_html: bool) -> Self {
        self.request.is_html = is_html;
        self
    }

    #[must_use]
    pub fn cc(mut self, recipient: Recipient) -> Self {
        self.request.cc.push(recipient);
        self
    }

    #[must_use]
    pub fn bcc(mut self, recipient: Recipient) -> Self {
        self.request.bcc.push(recipient);
        self
    }

    #[must_use]
    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.request.reply_to = Some(address.into());
        self
    }

    #[must_use]
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub const fn priority(mut self, priority: u8) -> Self {
        self.request.priority = priority;
        self
    }

    /// # Errors
    ///
    /// See [`SendCommand::validate`].
    pub fn build(self) -> Result<SendCommand, ValidationError> {
        let Self {
            mut request,
            attachments,
        } = self;

        request.attachments = attachments.iter().map(EncodedAttachment::from).collect();
        SendCommand::validate(request)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::address::AddressError;

    fn full_command() -> SendCommand {
        SendCommand::builder("alice@example.com", "Quarterly report", "<p>Attached</p>")
            .to_name("Alice")
            .html(true)
            .cc(Recipient::new("bob@example.com").with_name("Bob"))
            .bcc(Recipient::new("audit@example.com"))
            .reply_to("reports@example.com")
            .attachment(Attachment::new("report.csv", b"a,b\n1,2\n".to_vec()))
            .header("X-Campaign", "q3")
            .priority(1)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let command = SendCommand::builder("alice@example.com", "Hi", "Hello")
            .build()
            .unwrap();

        assert_eq!(command.priority(), Priority::NORMAL);
        assert!(!command.is_html());
        assert!(command.cc().is_empty());
        assert!(command.attachments().is_empty());
        assert_eq!(command.to_name(), None);
    }

    #[test]
    fn test_invalid_recipient_rejected() {
        let err = SendCommand::builder("not-an-email", "Hi", "Hello")
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            ValidationError::InvalidAddress {
                field: "recipient",
                address: "not-an-email".to_string(),
                source: AddressError::MissingAtSign,
            }
        );
    }

    #[test]
    fn test_invalid_secondary_addresses_rejected() {
        let err = SendCommand::builder("alice@example.com", "Hi", "Hello")
            .cc(Recipient::new("bad@"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAddress { field: "cc", .. }));

        let err = SendCommand::builder("alice@example.com", "Hi", "Hello")
            .reply_to("nobody")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidAddress {
                field: "reply-to",
                ..
            }
        ));
    }

    #[test]
    fn test_addresses_are_stored_normalized() {
        let command = SendCommand::builder(" alice@Example.COM ", "Hi", "Hello")
            .cc(Recipient::new(" bob@example.com ").with_name("Bob"))
            .bcc(Recipient::new("audit@EXAMPLE.com\t"))
            .reply_to("carol@example.com ")
            .build()
            .unwrap();

        assert_eq!(command.to(), "alice@example.com");
        assert_eq!(command.cc()[0].email, "bob@example.com");
        assert_eq!(command.cc()[0].name.as_deref(), Some("Bob"));
        assert_eq!(command.bcc()[0].email, "audit@example.com");
        assert_eq!(command.reply_to(), Some("carol@example.com"));
    }

    #[test]
    fn test_priority_bounds() {
        for value in 1..=5 {
            assert!(Priority::new(value).is_ok());
        }

        let err = SendCommand::builder("alice@example.com", "Hi", "Hello")
            .priority(0)
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidPriority(0));
        assert!(Priority::new(6).is_err());
    }

    #[test]
    fn test_header_validation() {
        let err = SendCommand::builder("alice@example.com", "Hi", "Hello")
            .header("X-Bad:Name", "value")
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidHeaderName("X-Bad:Name".into()));

        let err = SendCommand::builder("alice@example.com", "Hi", "Hello")
            .header("X-Injected", "value\r\nBcc: victim@example.com")
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidHeaderValue("X-Injected".into()));
    }

    #[test]
    fn test_json_round_trip_keeps_every_field() {
        let command = full_command();

        let json = serde_json::to_string(&command).unwrap();
        let decoded: SendCommand = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, command);
        assert_eq!(decoded.attachments()[0].content, b"a,b\n1,2\n");
    }

    #[test]
    fn test_wire_format_uses_camel_case_and_base64() {
        let json = serde_json::to_value(full_command()).unwrap();

        assert_eq!(json["toName"], "Alice");
        assert_eq!(json["isHtml"], true);
        assert_eq!(json["replyTo"], "reports@example.com");
        assert_eq!(json["priority"], 1);
        assert_eq!(json["attachments"][0]["content"], "YSxiCjEsMgo=");
    }

    #[test]
    fn test_deserialising_revalidates() {
        let json = r#"{"to":"nobody","subject":"Hi","body":"Hello"}"#;
        assert!(serde_json::from_str::<SendCommand>(json).is_err());

        let json = r#"{"to":"a@example.com","subject":"Hi","body":"Hello","priority":9}"#;
        assert!(serde_json::from_str::<SendCommand>(json).is_err());

        let json = r#"{"to":"a@example.com","subject":"Hi","body":"Hello"}"#;
        let command: SendCommand = serde_json::from_str(json).unwrap();
        assert_eq!(command.priority().get(), 3);
    }

    #[test]
    fn test_bad_base64_attachment() {
        let request = SendRequest {
            attachments: vec![EncodedAttachment {
                name: "file.bin".into(),
                content: "not base64!".into(),
            }],
            ..serde_json::from_str(r#"{"to":"a@example.com"}"#).unwrap()
        };

        assert!(matches!(
            SendCommand::validate(request),
            Err(ValidationError::AttachmentEncoding { .. })
        ));
    }
}
