//! Error types for Cookieconsent

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("validation failed: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("constraint drop unsupported on {table}: {operation} - {reason}")]
    ConstraintDropUnsupported {
        table: String,
        operation: String,
        reason: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn storage(message: impl std::fmt::Display) -> Self {
        Self::StorageUnavailable(message.to_string())
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn constraint_drop_unsupported(
        table: impl Into<String>,
        operation: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::ConstraintDropUnsupported {
            table: table.into(),
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors a caller may retry without changing the request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}
