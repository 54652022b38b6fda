//! Error taxonomy for the registry core.
//!
//! Input and validation failures are raised before anything is persisted.
//! Persistence failures abort the whole upload. Not-found is kept apart from
//! persistence faults so read paths can tell "missing" from "broken".

use thiserror::Error;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// Malformed request: missing application, missing file, bad extension.
    #[error("{0}")]
    Input(String),

    /// The document failed to parse or was rejected by the validator.
    #[error("{message}: {details}")]
    Validation { message: String, details: String },

    #[error("{0}")]
    NotFound(String),

    /// Database or artifact storage fault.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl RegistryError {
    pub fn validation(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: details.into(),
        }
    }
}

impl From<sqlx::Error> for RegistryError {
    fn from(e: sqlx::Error) -> Self {
        Self::Persistence(format!("database: {}", e))
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(e: std::io::Error) -> Self {
        Self::Persistence(format!("storage: {}", e))
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Persistence(format!("encoding: {}", e))
    }
}
