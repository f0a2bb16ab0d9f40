//! Error types for configuration loading.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration key not found: {0}")]
    KeyNotFound(String),

    #[error("Failed to load configuration from {path}: {reason}")]
    LoadError { path: String, reason: String },

    #[error("Failed to parse {format} configuration: {reason}")]
    ParseError { format: &'static str, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Cannot read {key}: {reason}")]
    DeserializationError { key: String, reason: String },

    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvError(#[from] std::env::VarError),
}

impl ConfigError {
    /// Shorthand for a [`ConfigError::ValidationError`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
