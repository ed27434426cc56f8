//! Error types for Tapeloop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Cache errors
    #[error("Cache entry not found: {0}")]
    NotFound(String),

    #[error("Cache entry is already being written: {0}")]
    AlreadyWriting(String),

    #[error("Cache write aborted: {0}")]
    CacheAborted(String),

    // Range errors
    #[error("Requested range not satisfiable")]
    RangeUnsatisfiable { length: Option<u64> },

    #[error("Requested range not yet available ({available} bytes written)")]
    RangeNotYetAvailable { available: u64 },

    #[error("Invalid Range header: {0}")]
    InvalidRange(String),

    // Fetcher errors
    #[error("Failed to launch media fetcher: {0}")]
    LaunchFailure(String),

    #[error("Media fetcher exited with code {exit_code}: {message}")]
    FetchFailed { exit_code: i32, message: String },

    #[error("Media fetcher produced no data")]
    EmptyResult,

    #[error("Media fetcher stalled: no data after {seconds}s")]
    FetchStalled { seconds: u64 },

    // Session errors
    #[error("Client disconnected")]
    ClientDisconnected,

    #[error("Stream aborted: {0}")]
    StreamAborted(String),

    // Request errors
    #[error("{0}")]
    InvalidRequest(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// Whether the error originated in the external media fetcher.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            Error::LaunchFailure(_)
                | Error::FetchFailed { .. }
                | Error::EmptyResult
                | Error::FetchStalled { .. }
        )
    }
}
