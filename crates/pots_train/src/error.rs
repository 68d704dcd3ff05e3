//! Error types for training.

use thiserror::Error;

/// Result type alias for training operations.
pub type Result<T> = std::result::Result<T, TrainError>;

/// Errors that can occur during training.
#[derive(Error, Debug)]
pub enum TrainError {
    /// An epoch failed part-way. Recoverable when an earlier epoch improved.
    #[error("Training interrupted at epoch {epoch}: {reason}")]
    Interrupted {
        /// Epoch that failed (0-indexed).
        epoch: usize,
        /// Rendering of the underlying error.
        reason: String,
    },

    /// Training failed with no usable model.
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// Invalid configuration or a violated training invariant.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Checkpoint could not be written or read.
    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    /// The model failed during a step, validation or inference.
    #[error("Model error: {0}")]
    ModelError(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Data error.
    #[error("Data error: {0}")]
    DataError(#[from] pots_data::DataError),

    /// Device resolution error.
    #[error("Compute error: {0}")]
    ComputeError(#[from] pots_compute::ComputeError),

    /// Core error.
    #[error("Core error: {0}")]
    CoreError(#[from] pots_core::CoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serde_json::Error> for TrainError {
    fn from(err: serde_json::Error) -> Self {
        TrainError::SerializationError(err.to_string())
    }
}
