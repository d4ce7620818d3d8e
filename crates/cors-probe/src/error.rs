//! Error types for the relay, the exchange store and run evaluation.

use thiserror::Error;

/// Failures talking to the upstream target.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("upstream connection error: {0}")]
    UpstreamUnavailable(#[source] reqwest::Error),

    #[error("upstream timeout: {0}")]
    UpstreamTimeout(#[source] reqwest::Error),

    #[error("failed to read inbound request body: {0}")]
    BodyRead(String),
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RelayError::UpstreamTimeout(e)
        } else {
            RelayError::UpstreamUnavailable(e)
        }
    }
}

/// Failures reading or writing captured exchanges.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to serialize exchange: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to prepare store location: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failures reported by the page driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver unavailable: {0}")]
    Unavailable(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("{0}")]
    Script(String),
}

/// Why a run produced no verdict. The `Display` text becomes
/// `RunResult.error`.
#[derive(Debug, Error)]
pub enum RunFailure {
    #[error("no exchanges captured")]
    EmptyCapture,

    #[error("failed to read captured exchanges: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}
