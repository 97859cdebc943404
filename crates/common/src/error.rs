//! Error types for reclog

use thiserror::Error;

/// Result type alias using the reclog Error
pub type Result<T> = std::result::Result<T, Error>;

/// reclog error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot connect to {server}: {message}")]
    Connection { server: String, message: String },

    #[error("Invalid metadata for key '{key}': {message}")]
    Validation { key: String, message: String },

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Remote service error: {0}")]
    Service(String),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid filter expression: {0}")]
    InvalidFilter(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn recording_not_found(id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "recording".to_string(),
            id: id.into(),
        }
    }

    /// Whether retrying the failed operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Connection { .. } | Error::Transfer(_) | Error::Service(_)
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
