use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Failed to encode webhook payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Webhook secret cannot be used as an HMAC key")]
    InvalidSecret,

    #[error("Webhook request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Webhook request to {url} failed with code {status}")]
    Status { url: String, status: u16 },
}
