//! Errors raised while assembling or using a [`RestContext`](crate::RestContext).

use stratus_config::ConfigError;
use stratus_http::HttpError;
use thiserror::Error;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Settings could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A request failed, or a component could not start.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Credentials are missing or unusable for the chosen signer.
    #[error("invalid credentials: {0}")]
    Credentials(String),
}

impl Error {
    /// The HTTP error, if this is one.
    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            Error::Http(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for context operations.
pub type Result<T> = std::result::Result<T, Error>;
