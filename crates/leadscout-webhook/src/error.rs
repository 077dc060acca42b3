use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook returned HTTP {0}")]
    HttpStatus(u16),

    #[error(transparent)]
    Db(#[from] leadscout_db::DbError),

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid stored delivery: {0}")]
    InvalidRow(String),
}
