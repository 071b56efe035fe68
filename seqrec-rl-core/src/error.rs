//! Error types shared across the workspace

use thiserror::Error;

/// Core error type for algorithm, model, and batch operations
#[derive(Error, Debug)]
pub enum RLError {
    /// Model-related errors
    #[error("Model error: {0}")]
    Model(String),

    /// Malformed batch input
    #[error("Batch error: {0}")]
    Batch(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected size
        expected: usize,
        /// Actual size
        actual: usize,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for workspace operations
pub type Result<T> = std::result::Result<T, RLError>;
