//! Error types for pooled command execution.

use http::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::classify::ErrorKind;

/// Result type for command execution.
pub type Result<T> = std::result::Result<T, HttpError>;

/// Errors raised by the pool, the lifecycle, filters and the executor service.
///
/// The type is `Clone` so that a single failure can be both recorded on a
/// component's lifecycle and delivered to the command that triggered it.
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// No connection became available in time.
    #[error("Timeout after {waited:?} for a connection to {endpoint}")]
    Timeout {
        /// Endpoint the pool serves.
        endpoint: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A component was used in a state that does not allow it.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// A request or configuration value was rejected.
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// Transient transport failure; the command may be replayed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Unrecoverable transport failure; brings down the pool.
    #[error("Fatal transport error: {0}")]
    Fatal(String),

    /// The command was cancelled before it completed.
    #[error("Command cancelled")]
    Cancelled,

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Request signing failed.
    #[error("Signing error: {0}")]
    Signing(String),

    /// The server answered with an error status.
    #[error(transparent)]
    Response(#[from] ResponseError),
}

impl HttpError {
    /// Failures that are handled inside the pool by requeueing the command.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connection(_))
    }

    /// Failures that shut down the pool for the endpoint.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Position of this error in the response error taxonomy, if any.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Response(e) => Some(e.kind),
            Self::IllegalState(_) => Some(ErrorKind::IllegalState),
            _ => None,
        }
    }

    /// HTTP status code if the server answered.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Response(e) => Some(e.status),
            _ => None,
        }
    }
}

impl From<url::ParseError> for HttpError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for HttpError {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::IllegalArgument(format!("invalid header value: {}", e))
    }
}

impl From<http::header::InvalidHeaderName> for HttpError {
    fn from(e: http::header::InvalidHeaderName) -> Self {
        Self::IllegalArgument(format!("invalid header name: {}", e))
    }
}

/// A classified error response from a provider.
#[derive(Debug, Clone, Error)]
#[error("{request_line} failed with {status} ({kind}): {message}")]
pub struct ResponseError {
    /// Taxonomy entry.
    pub kind: ErrorKind,
    /// Status returned by the server.
    pub status: StatusCode,
    /// Provider error code, when the body carried one.
    pub code: Option<String>,
    /// Provider message, or the canonical reason phrase.
    pub message: String,
    /// Request line of the failed request.
    pub request_line: String,
}
