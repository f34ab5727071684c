//! Error types shared across the core crate

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in core components
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration load or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Accounting record decode error
    #[error("Record decode error: {0}")]
    Decode(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
