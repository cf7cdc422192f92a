use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Sent,
    Failed,
}

impl NotificationStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// Body of a webhook request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub message_id: String,
    pub status: NotificationStatus,
    /// RFC 3339, second precision, UTC
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl WebhookPayload {
    #[must_use]
    pub fn sent(message_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            message_id: message_id.to_string(),
            status: NotificationStatus::Sent,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            error: None,
            attempts: None,
        }
    }

    #[must_use]
    pub fn failed(message_id: &str, error: &str, attempts: u32, at: DateTime<Utc>) -> Self {
        Self {
            message_id: message_id.to_string(),
            status: NotificationStatus::Failed,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            error: Some(error.to_string()),
            attempts: Some(attempts),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_718_000_000, 0).unwrap()
    }

    #[test]
    fn test_sent_payload_has_no_failure_fields() {
        let json = serde_json::to_string(&WebhookPayload::sent("01HZ", at())).unwrap();
        assert_eq!(
            json,
            r#"{"message_id":"01HZ","status":"sent","timestamp":"2024-06-10T06:13:20Z"}"#
        );
    }

    #[test]
    fn test_failed_payload() {
        let json = serde_json::to_value(WebhookPayload::failed("01HZ", "timeout", 2, at())).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "timeout");
        assert_eq!(json["attempts"], 2);
    }
}
