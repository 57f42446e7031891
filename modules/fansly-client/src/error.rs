use thiserror::Error;

pub type Result<T> = std::result::Result<T, FanslyError>;

#[derive(Debug, Error)]
pub enum FanslyError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("tag not found")]
    TagNotFound,

    #[error("account not found")]
    AccountNotFound,

    #[error("request cancelled")]
    Cancelled,
}

impl FanslyError {
    /// True for errors worth another attempt: network failures and the
    /// retryable upstream statuses.
    pub fn is_transient(&self) -> bool {
        match self {
            FanslyError::Network(_) => true,
            FanslyError::Api { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }
}
