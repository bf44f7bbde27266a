//! Failures of a remote snapshot fetch. The poll cycle logs and swallows all
//! of them; they never reach stream subscribers.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level failure (DNS, connect, timeout, TLS).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status (bad key, rate limit).
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not the expected envelope.
    #[error("failed to decode snapshot response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The blocking fetch task panicked or was cancelled.
    #[error("fetch task failed: {0}")]
    Task(String),

    /// Anything a custom fetcher wants to report.
    #[error("{0}")]
    Other(String),
}
