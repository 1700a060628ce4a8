//! Error types for BurrowDB.

use thiserror::Error;

/// Result type alias using BurrowError.
pub type Result<T> = std::result::Result<T, BurrowError>;

/// Errors that can occur in BurrowDB operations.
#[derive(Debug, Error)]
pub enum BurrowError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    // Log errors
    #[error("Invalid log file header: {0}")]
    InvalidFileHeader(String),

    #[error("Log is not empty; reopen with auto recovery")]
    NeedsRecovery,

    // Parameter errors
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BurrowError {
    /// Shorthand for an [`BurrowError::InvalidParameter`] with formatted fields.
    pub fn invalid_parameter(name: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
        }
    }
}
