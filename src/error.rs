//! Error types for douk-dl
//!
//! This module provides the error taxonomy used across the engine:
//! - Component errors ([`ExtractionError`], [`FetchError`], [`SinkError`], [`StoreError`])
//! - A crate-level [`Error`] with `From` conversions for `?` propagation
//! - [`ErrorKind`] / [`ErrorInfo`], the machine-readable cause attached to every
//!   terminal [`ResultEvent`](crate::types::ResultEvent)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for douk-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for douk-dl
///
/// Returned by the construction, submission and persistence entry points.
/// Per-item failures never surface here; they are reported through the
/// batch result stream instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.concurrency")
        key: Option<String>,
    },

    /// Store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Link could not be resolved into a work item
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// HTTP fetch failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Writing a completed item failed
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction or request error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new batches
    #[error("shutdown in progress: not accepting new batches")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Store-related errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to open or connect to the database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query or write failed at the storage layer
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Constraint violation (e.g., a flag value outside 0/1)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Errors raised while turning a raw link or id into a resolved work item
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The platform reports the item as deleted, private or missing
    #[error("item {id} not found: {reason}")]
    NotFound {
        /// Platform-native item id (or the normalized input when unknown)
        id: String,
        /// What the platform reported
        reason: String,
    },

    /// The metadata response matched none of the known shapes
    #[error("{platform} response did not match any known schema: {detail}")]
    SchemaMismatch {
        /// Strategy that parsed the response
        platform: &'static str,
        /// Which part of the response was unexpected
        detail: String,
    },

    /// A short link redirected more times than allowed
    #[error("too many redirects resolving {url} (gave up after {hops} hops)")]
    TooManyRedirects {
        /// The link being resolved
        url: String,
        /// Number of hops followed
        hops: usize,
    },

    /// The platform signalled throttling inside an otherwise successful response
    #[error("{platform} is throttling requests: {detail}")]
    RateLimited {
        /// Strategy that observed the throttle signal
        platform: &'static str,
        /// Raw signal text or status code
        detail: String,
    },

    /// Network failure underneath the extraction call
    #[error("transport error during extraction: {0}")]
    Transport(FetchError),

    /// No registered strategy recognises the input
    #[error("no extractor supports input {input:?}")]
    Unsupported {
        /// The normalized input
        input: String,
    },

    /// The input is not a link or an id at all
    #[error("invalid input {input:?}: {reason}")]
    InvalidInput {
        /// The raw input
        input: String,
        /// Why it was rejected
        reason: String,
    },
}

impl From<FetchError> for ExtractionError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound { url } => ExtractionError::NotFound {
                id: url,
                reason: "metadata endpoint returned 404".to_string(),
            },
            FetchError::RateLimited { url, .. } => ExtractionError::RateLimited {
                platform: "http",
                detail: format!("HTTP 429 from {url}"),
            },
            other => ExtractionError::Transport(other),
        }
    }
}

/// HTTP fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// 401/403 - access denied, typically an expired signed URL or a blocked client
    #[error("forbidden (HTTP {status}): {url}")]
    Forbidden {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// 404/410
    #[error("not found: {url}")]
    NotFound {
        /// Requested URL
        url: String,
    },

    /// 429 - the shared bucket has been put into cooldown
    #[error("rate limited by upstream: {url}")]
    RateLimited {
        /// Requested URL
        url: String,
        /// Parsed `Retry-After` header, if any
        retry_after: Option<Duration>,
    },

    /// Timeout, connection failure, 5xx, or a stream cut short
    #[error("transport error fetching {url}: {reason}")]
    Transport {
        /// Requested URL
        url: String,
        /// Underlying cause
        reason: String,
    },

    /// Any other non-success status (400, 405, ...)
    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The response could not be decoded
    #[error("invalid response body from {url}: {reason}")]
    InvalidBody {
        /// Requested URL
        url: String,
        /// Decoder error
        reason: String,
    },

    /// Writing the streamed body to disk failed
    #[error("failed to write {path}: {reason}")]
    Io {
        /// Local file being written
        path: PathBuf,
        /// Underlying I/O error
        reason: String,
    },
}

/// Errors raised while placing a resolved item on disk
#[derive(Debug, Error)]
pub enum SinkError {
    /// Local filesystem failure
    #[error("I/O error at {path}: {reason}")]
    Io {
        /// Path being written, renamed or created
        path: PathBuf,
        /// Underlying I/O error
        reason: String,
    },

    /// Downloaded bytes do not hash to the advertised checksum
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Asset file name
        file: String,
        /// Advertised checksum
        expected: String,
        /// Computed checksum
        actual: String,
    },

    /// Downloaded byte count differs from the advertised size
    #[error("size mismatch for {file}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Asset file name
        file: String,
        /// Advertised size
        expected: u64,
        /// Bytes on disk
        actual: u64,
    },

    /// Fetching an asset failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Recording completion failed after the files were placed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Cancellation observed at a checkpoint; nothing was placed
    #[error("commit cancelled before the item was placed")]
    Cancelled,
}

impl SinkError {
    /// Build an [`SinkError::Io`] from a path and an I/O error
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        SinkError::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// Machine-readable failure category attached to terminal events
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Deleted, private or missing upstream
    NotFound,
    /// Access denied upstream
    Forbidden,
    /// Upstream rejected the request with another 4xx status
    Rejected,
    /// Platform or HTTP-level throttling
    RateLimited,
    /// Network failure, timeout or 5xx
    Transport,
    /// Unknown metadata response shape
    SchemaMismatch,
    /// Redirect chain too long
    TooManyRedirects,
    /// No strategy for this input
    Unsupported,
    /// Input is neither a link nor an id
    InvalidInput,
    /// Bytes on disk do not match the advertised checksum or size
    ChecksumMismatch,
    /// Local filesystem failure
    Io,
    /// Persistence failure
    Store,
    /// Batch cancelled or timed out before the item finished
    Cancelled,
}

impl ErrorKind {
    /// Whether a fresh item-level attempt may succeed
    ///
    /// `ChecksumMismatch` is included: a bad body usually means the signed URL
    /// went stale, so the retry re-resolves before downloading again.
    pub fn is_item_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Transport | ErrorKind::ChecksumMismatch
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Rejected => "rejected",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transport => "transport",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::TooManyRedirects => "too_many_redirects",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::ChecksumMismatch => "checksum_mismatch",
            ErrorKind::Io => "io",
            ErrorKind::Store => "store",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Cause carried by a failed terminal event
///
/// ```json
/// { "kind": "schema_mismatch", "message": "douyin response did not match any known schema: ..." }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable category
    pub kind: ErrorKind,
    /// Human-readable cause, suitable for display
    pub message: String,
}

impl ErrorInfo {
    /// Create a new error info
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Item was dropped by cancellation or the batch deadline
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, reason)
    }
}

impl FetchError {
    /// Failure category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Forbidden { .. } => ErrorKind::Forbidden,
            FetchError::NotFound { .. } => ErrorKind::NotFound,
            FetchError::RateLimited { .. } => ErrorKind::RateLimited,
            FetchError::Transport { .. } => ErrorKind::Transport,
            FetchError::UnexpectedStatus { .. } => ErrorKind::Rejected,
            FetchError::InvalidBody { .. } => ErrorKind::SchemaMismatch,
            FetchError::Io { .. } => ErrorKind::Io,
        }
    }
}

impl ExtractionError {
    /// Failure category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractionError::NotFound { .. } => ErrorKind::NotFound,
            ExtractionError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            ExtractionError::TooManyRedirects { .. } => ErrorKind::TooManyRedirects,
            ExtractionError::RateLimited { .. } => ErrorKind::RateLimited,
            ExtractionError::Transport(inner) => inner.kind(),
            ExtractionError::Unsupported { .. } => ErrorKind::Unsupported,
            ExtractionError::InvalidInput { .. } => ErrorKind::InvalidInput,
        }
    }
}

impl SinkError {
    /// Failure category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SinkError::Io { .. } => ErrorKind::Io,
            SinkError::ChecksumMismatch { .. } | SinkError::SizeMismatch { .. } => {
                ErrorKind::ChecksumMismatch
            }
            SinkError::Fetch(inner) => inner.kind(),
            SinkError::Store(_) => ErrorKind::Store,
            SinkError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<&ExtractionError> for ErrorInfo {
    fn from(err: &ExtractionError) -> Self {
        ErrorInfo::new(err.kind(), err.to_string())
    }
}

impl From<&SinkError> for ErrorInfo {
    fn from(err: &SinkError) -> Self {
        ErrorInfo::new(err.kind(), err.to_string())
    }
}

impl From<&StoreError> for ErrorInfo {
    fn from(err: &StoreError) -> Self {
        ErrorInfo::new(ErrorKind::Store, err.to_string())
    }
}
