use std::{fmt, time::Duration};

use aegis_common::{SendCommand, outgoing};
use async_trait::async_trait;
use lettre::{
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{
        Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart,
        header::{ContentType, HeaderName, HeaderValue},
    },
    transport::smtp::authentication::Credentials,
};
use serde::Deserialize;
use tracing::instrument;
use ulid::Ulid;

use super::{SmtpReceipt, Transport, sanitize};
use crate::{DeliveryError, PermanentError, SystemError};

/// How the connection to the relay is secured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum TlsMode {
    /// Plain connection upgraded with STARTTLS (submission, port 587)
    #[default]
    StartTls,
    /// TLS from the first byte (implicit TLS, port 465)
    Tls,
    /// No encryption at all; only for local relays and tests
    None,
}

impl TlsMode {
    const fn default_port(self) -> u16 {
        match self {
            Self::StartTls => 587,
            Self::Tls => 465,
            Self::None => 25,
        }
    }
}

fn default_host() -> String {
    String::from("localhost")
}

fn default_from_address() -> String {
    String::from("aegis@localhost")
}

const fn default_timeout_secs() -> u64 {
    30
}

/// Relay settings
///
/// ```ron
/// smtp: (
///     host: "smtp.example.com",
///     tls: StartTls,
///     username: "mailer",
///     from_address: "noreply@example.com",
///     from_name: "Example",
/// ),
/// ```
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Defaults to the conventional port for the TLS mode
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub tls: TlsMode,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default)]
    pub from_name: Option<String>,
    /// Connect and per-command timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            tls: TlsMode::default(),
            username: None,
            password: None,
            from_address: default_from_address(),
            from_name: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port())
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from_address", &self.from_address)
            .field("from_name", &self.from_name)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl SmtpConfig {
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.tls.default_port())
    }
}

/// Text portion of a message, before attachments are added
enum TextPart {
    Plain(SinglePart),
    Alternative(MultiPart),
}

/// Delivers through a single configured relay using lettre's pooled async
/// SMTP client.
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    relay: String,
}

impl fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("from", &self.from.to_string())
            .field("relay", &self.relay)
            .finish_non_exhaustive()
    }
}

impl SmtpTransport {
    /// Build a transport for the relay described by `config`.
    ///
    /// No connection is made until the first message is sent.
    ///
    /// # Errors
    /// Returns a configuration error if the sender address is invalid or TLS
    /// parameters cannot be created for the host.
    pub fn new(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        let configuration = |reason: String| DeliveryError::from(SystemError::Configuration(reason));

        let builder = match config.tls {
            TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host),
            TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host),
            TlsMode::None => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                &config.host,
            )),
        }
        .map_err(|e| configuration(format!("SMTP relay {}: {e}", config.host)))?;

        let mut builder = builder
            .port(config.port())
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let Some(username) = &config.username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            ));
        }

        let address = config
            .from_address
            .parse::<Address>()
            .map_err(|e| configuration(format!("From address {}: {e}", config.from_address)))?;

        Ok(Self {
            mailer: builder.build(),
            from: Mailbox::new(config.from_name.clone(), address),
            relay: format!("{}:{}", config.host, config.port()),
        })
    }

    /// Assemble the MIME message for `command`, returning it with its
    /// `Message-ID`.
    fn build_message(&self, command: &SendCommand) -> Result<(Message, String), DeliveryError> {
        let message_id = format!("<{}@{}>", Ulid::new(), self.from.email.domain());

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(mailbox(command.to_name(), command.to())?)
            .subject(sanitize::clean_text(command.subject()))
            .message_id(Some(message_id.clone()));

        for recipient in command.cc() {
            builder = builder.cc(mailbox(recipient.name.as_deref(), &recipient.email)?);
        }

        for recipient in command.bcc() {
            builder = builder.bcc(mailbox(recipient.name.as_deref(), &recipient.email)?);
        }

        if let Some(reply_to) = command.reply_to() {
            builder = builder.reply_to(mailbox(None, reply_to)?);
        }

        for (name, value) in command.headers() {
            let header = HeaderName::new_from_ascii(name.clone()).map_err(|_| {
                PermanentError::InvalidMessage(format!("Invalid header name {name}"))
            })?;
            builder = builder.raw_header(HeaderValue::new(header, value.clone()));
        }

        builder = builder.raw_header(HeaderValue::new(
            HeaderName::new_from_ascii_str("X-Priority"),
            command.priority().get().to_string(),
        ));

        let body = sanitize::clean_text(command.body());
        let text = if command.is_html() {
            let html = sanitize::extract_body(&body);
            TextPart::Alternative(MultiPart::alternative_plain_html(
                sanitize::strip_tags(&html),
                html,
            ))
        } else {
            TextPart::Plain(SinglePart::plain(body))
        };

        let message = if command.attachments().is_empty() {
            match text {
                TextPart::Plain(part) => builder.singlepart(part)?,
                TextPart::Alternative(parts) => builder.multipart(parts)?,
            }
        } else {
            let octet_stream = ContentType::parse("application/octet-stream")
                .map_err(|e| SystemError::Internal(format!("Attachment content type: {e}")))?;

            let mut mixed = match text {
                TextPart::Plain(part) => MultiPart::mixed().singlepart(part),
                TextPart::Alternative(parts) => MultiPart::mixed().multipart(parts),
            };

            for attachment in command.attachments() {
                mixed = mixed.singlepart(
                    MimeAttachment::new(attachment.name.clone())
                        .body(attachment.content.clone(), octet_stream.clone()),
                );
            }

            builder.multipart(mixed)?
        };

        Ok((message, message_id))
    }
}

fn mailbox(name: Option<&str>, email: &str) -> Result<Mailbox, DeliveryError> {
    Ok(Mailbox::new(name.map(str::to_string), email.parse::<Address>()?))
}

#[async_trait]
impl Transport for SmtpTransport {
    #[instrument(level = "debug", skip_all, fields(relay = %self.relay))]
    async fn send(&self, command: &SendCommand) -> Result<SmtpReceipt, DeliveryError> {
        let (message, smtp_message_id) = self.build_message(command)?;

        let reply = self.mailer.send(message).await?;
        let response = format!(
            "{} {}",
            reply.code(),
            reply.message().collect::<Vec<_>>().join(" ")
        );

        outgoing!(
            level = DEBUG,
            "{} accepted {smtp_message_id}: {response}",
            self.relay
        );

        Ok(SmtpReceipt {
            smtp_message_id,
            response,
        })
    }
}
