use std::time::Duration;

/// Core error type for the scraper pipeline.
///
/// Adapter crates map their specific errors into this type so the pipeline can
/// decide per record whether to retry, skip, or abort the run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {message}")]
    Transport {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("privacy restricted: {0}")]
    PrivacyRestricted(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Only transport failures (rate limits, connectivity) are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
