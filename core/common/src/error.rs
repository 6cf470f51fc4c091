//! Common error types for docsync.

use thiserror::Error;

/// Top-level error type for docsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure (connection refused, timeout, TLS).
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status not covered by a more specific variant.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A write was rejected because the revision id it was based on is stale.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Credentials missing or rejected.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Credentials valid but not allowed to perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Settings are incomplete or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote payload could not be decoded (base64 or UTF-8).
    #[error("Decode error: {0}")]
    Decode(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether the failure is transient and the call may be repeated.
    ///
    /// Transport failures, 5xx gateway/server errors and 409 are retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::Conflict(_) => true,
            Error::Http { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Whether the remote object is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether a mutation was rejected because its precondition no longer holds.
    pub fn is_stale_revision(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::AlreadyExists(_))
    }

    /// Map an HTTP status and body message to the matching variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Error::Authentication(message),
            403 => Error::PermissionDenied(message),
            404 => Error::NotFound(message),
            409 => Error::Conflict(message),
            _ => Error::Http { status, message },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
