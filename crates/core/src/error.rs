//! Unified error types for sieve.
//!
//! Every variant carries a stable code prefix in its display form so callers
//! at the tool boundary can match on it without parsing free text.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the sieve pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty location list).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Local path resolves outside every allow-listed directory.
    #[error("PATH_NOT_ALLOWED: {0}")]
    PathNotAllowed(String),

    /// Local filesystem access is switched off.
    #[error("FILESYSTEM_DISABLED")]
    FilesystemDisabled,

    /// Local path does not exist.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// Local path exists but is not a regular file.
    #[error("NOT_A_FILE: {0}")]
    NotAFile(String),

    /// Local file exceeds the configured maximum size.
    #[error("FILE_TOO_LARGE: {size} bytes exceeds {limit}")]
    FileTooLarge { size: u64, limit: u64 },

    /// Robots.txt disallowed access.
    #[error("ROBOTS_DISALLOWED: {0}")]
    RobotsDisallowed(String),

    /// Fetch timeout.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// Fetch response too large.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// Non-success HTTP status.
    #[error("HTTP_ERROR: status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Connection-level failure.
    #[error("NETWORK_ERROR: {0}")]
    Network(String),

    /// No pooled connection or browser instance became free in time.
    #[error("POOL_EXHAUSTED: {0}")]
    PoolExhausted(String),

    /// Render mode is disabled.
    #[error("RENDER_DISABLED")]
    RenderDisabled,

    /// Render failed.
    #[error("RENDER_FAILED: {0}")]
    RenderFailed(String),

    /// Browser pool could not provide a working instance.
    #[error("BROWSER_UNAVAILABLE: {0}")]
    BrowserUnavailable(String),

    /// Content extraction failed.
    #[error("EXTRACT_FAILED: {0}")]
    ExtractFailed(String),

    /// Summarization backend failed persistently.
    #[error("PROVIDER_ERROR: {0}")]
    Provider(String),

    /// Unknown or disabled credential.
    #[error("UNAUTHENTICATED")]
    Unauthenticated,

    /// Credential is valid but its request budget is spent.
    #[error("RATE_LIMITED: {name} exceeded {limit} requests per {window_secs}s")]
    RateLimited { name: String, limit: u32, window_secs: u64 },

    /// Operation was cancelled by the caller.
    #[error("CANCELLED")]
    Cancelled,

    /// Value could not be (de)serialized.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),
}

impl Error {
    /// Whether retrying the same operation may succeed.
    ///
    /// Security and malformed-input errors are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::FetchTimeout(_) | Error::PoolExhausted(_) => true,
            Error::HttpStatus { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Security errors are raised as-is and never downgraded or retried.
    pub fn is_security(&self) -> bool {
        matches!(self, Error::PathNotAllowed(_) | Error::FilesystemDisabled)
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidInput(_) | Error::InvalidUrl(_) => -32602,
            Error::ExtractFailed(_) => -32000,
            Error::Database(_) | Error::MigrationFailed(_) | Error::Serialization(_) => -32002,
            Error::PathNotAllowed(_) | Error::FilesystemDisabled => -32003,
            Error::NotFound(_) | Error::NotAFile(_) | Error::FileTooLarge { .. } => -32004,
            Error::RobotsDisallowed(_) => -32005,
            Error::FetchTimeout(_) => -32006,
            Error::FetchTooLarge(_) => -32007,
            Error::HttpStatus { .. } | Error::Network(_) => -32008,
            Error::PoolExhausted(_) => -32009,
            Error::RenderDisabled => -32011,
            Error::RenderFailed(_) | Error::BrowserUnavailable(_) => -32012,
            Error::Provider(_) => -32013,
            Error::Unauthenticated => -32014,
            Error::RateLimited { .. } => -32015,
            Error::Cancelled => -32016,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
