use std::time::Duration;

use aegis_common::outgoing;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use sha2::Sha256;

use crate::{NotificationSink, NotifyError, WebhookPayload};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Signature";

const fn default_timeout_secs() -> u64 {
    10
}

/// Where (and whether) to send delivery webhooks
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookConfig {
    /// Endpoint to POST to; no URL disables notifications
    #[serde(default)]
    pub url: Option<String>,
    /// Shared secret used to sign request bodies
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            secret: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// `sha256=` followed by the hex HMAC-SHA256 of `body` keyed with `secret`
///
/// # Errors
/// Returns [`NotifyError::InvalidSecret`] if the secret is rejected as a key.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, NotifyError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| NotifyError::InvalidSecret)?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Posts signed JSON notifications to a configured endpoint
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
    secret: Option<String>,
}

impl WebhookNotifier {
    /// # Errors
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(config: WebhookConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("aegis/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(NotifyError::Client)?;

        Ok(Self {
            client,
            url: config.url.filter(|url| !url.trim().is_empty()),
            secret: config.secret.filter(|secret| !secret.is_empty()),
        })
    }

    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// Send one payload, reporting any failure.
    ///
    /// Does nothing when no URL is configured.
    ///
    /// # Errors
    /// Fails on encoding, transport errors and non-2xx responses.
    pub async fn deliver(&self, payload: &WebhookPayload) -> Result<(), NotifyError> {
        let Some(url) = &self.url else {
            return Ok(());
        };

        let body = serde_json::to_vec(payload)?;

        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json");

        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign(secret, &body)?);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|source| NotifyError::Request {
                url: url.clone(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status {
                url: url.clone(),
                status: response.status().as_u16(),
            })
        }
    }

    async fn notify(&self, payload: WebhookPayload) {
        if !self.is_configured() {
            return;
        }

        match self.deliver(&payload).await {
            Ok(()) => outgoing!(
                level = INFO,
                "Webhook notification sent for {} ({})",
                payload.message_id,
                payload.status.as_str()
            ),
            Err(err) => tracing::warn!(
                message_id = %payload.message_id,
                status = payload.status.as_str(),
                error = %err,
                "Webhook notification failed"
            ),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify_success(&self, message_id: &str) {
        self.notify(WebhookPayload::sent(message_id, Utc::now()))
            .await;
    }

    async fn notify_failure(&self, message_id: &str, error: &str, attempts: u32) {
        self.notify(WebhookPayload::failed(
            message_id,
            error,
            attempts,
            Utc::now(),
        ))
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_matches_rfc_4231_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            sign("Jefe", b"what do ya want for nothing?").unwrap(),
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_blank_url_disables_notifier() {
        let notifier = WebhookNotifier::new(WebhookConfig {
            url: Some("   ".into()),
            ..WebhookConfig::default()
        })
        .unwrap();
        assert!(!notifier.is_configured());
    }

    #[tokio::test]
    async fn test_unconfigured_deliver_is_a_no_op() {
        let notifier = WebhookNotifier::new(WebhookConfig::default()).unwrap();
        let payload = WebhookPayload::sent("01HZ", Utc::now());
        assert!(notifier.deliver(&payload).await.is_ok());
    }
}
