//! Error types for the Horizon crates.

use thiserror::Error;

/// Top-level error type for driver operations.
///
/// Numeric oddities (non-finite losses, division by zero in MAPE) are not
/// errors: they propagate through the floating-point values themselves.
#[derive(Debug, Error)]
pub enum HorizonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(std::path::PathBuf),

    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl HorizonError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn data_source(msg: impl Into<String>) -> Self {
        Self::DataSource(msg.into())
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }
}
