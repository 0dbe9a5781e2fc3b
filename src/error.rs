//! Error taxonomy for the indexing and retrieval engine.
//!
//! Failures inside the embedding loop are retried or recorded per-chunk and
//! surface at the end of a run as [`Error::Indexing`]; failures outside the
//! loop abort the run. [`Error::Busy`] and [`Error::Cancelled`] are control
//! states rather than faults and map to 409 / a terminal progress event at
//! the boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited by embedding provider: {0}")]
    RateLimited(String),

    #[error("embedding provider rejected credentials: {0}")]
    Unauthorized(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("an index update is already running")]
    Busy,

    #[error("indexing was cancelled")]
    Cancelled,

    #[error("indexing failed: {0}")]
    Indexing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for failures the embedding loop should retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited(_) | Error::Transport(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_transport_retry() {
        assert!(Error::RateLimited("quota".into()).is_retryable());
        assert!(Error::Transport("reset".into()).is_retryable());
    }

    #[test]
    fn credential_and_config_failures_do_not_retry() {
        assert!(!Error::Unauthorized("bad key".into()).is_retryable());
        assert!(!Error::Config("missing url".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }
}
