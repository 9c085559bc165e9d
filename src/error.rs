use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("network error: {0}")]
    Network(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl FeedError {
    /// True for failures the user can recover from by repeating the action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Network(_) | FeedError::Store(_))
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Json(err.to_string())
    }
}

impl From<io::Error> for FeedError {
    fn from(err: io::Error) -> Self {
        FeedError::Io(err.to_string())
    }
}

impl From<anyhow::Error> for FeedError {
    fn from(err: anyhow::Error) -> Self {
        FeedError::Config(err.to_string())
    }
}
