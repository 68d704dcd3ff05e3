//! Error types for pots_data.

use thiserror::Error;

/// Result type alias using [`DataError`].
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors that can occur while building samples, datasets, and loaders.
#[derive(Error, Debug)]
pub enum DataError {
    /// Mismatched array extents, detected while building a sample.
    #[error("Shape error: {0}")]
    Shape(String),

    /// A required key is absent from a dataset source.
    #[error("Schema error: required key '{key}' is missing from {source_desc}")]
    Schema {
        /// The missing key.
        key: String,
        /// Description of the source that lacks it.
        source_desc: String,
    },

    /// Dataset is empty.
    #[error("Dataset is empty")]
    EmptyDataset,

    /// Index out of bounds.
    #[error("Index {index} out of bounds for length {length}")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The length of the collection.
        length: usize,
    },

    /// A step gap sequence that cannot produce valid deltas.
    #[error("Invalid step gap: {0}")]
    InvalidStepGap(String),

    /// Batch size error.
    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(String),

    /// File format error.
    #[error("File format error: {0}")]
    FormatError(String),

    /// Backing store error.
    #[error("Store error: {0}")]
    Store(String),

    /// A loader worker thread stopped without delivering its batches.
    #[error("Loader worker {0} terminated unexpectedly")]
    WorkerPanicked(usize),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Core error.
    #[error("Core error: {0}")]
    CoreError(#[from] pots_core::CoreError),
}

impl DataError {
    pub(crate) fn schema(key: &str, source_desc: impl Into<String>) -> Self {
        DataError::Schema {
            key: key.to_string(),
            source_desc: source_desc.into(),
        }
    }
}
