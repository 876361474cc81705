//! Error types for cohort ingestion.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while discovering or scanning raw inputs.
#[derive(Debug, Error)]
pub enum IngestError {
    // === File System Errors ===
    /// Directory not found or not a directory.
    #[error("directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    /// Failed to read directory entries.
    #[error("failed to read directory {path}: {source}")]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File extension is neither csv nor parquet.
    #[error("unsupported file type: {path}")]
    UnsupportedFormat { path: PathBuf },

    // === Planning Errors ===
    /// Row chunks must hold at least one row.
    #[error("row chunk size must be positive")]
    InvalidChunkSize,

    // === Split Errors ===
    /// Failed to read the splits file.
    #[error("failed to read splits {path}: {source}")]
    SplitsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The splits file is not a JSON object of patient id lists.
    #[error("failed to parse splits {path}: {source}")]
    SplitsParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // === DataFrame Errors ===
    /// Failed DataFrame operation.
    #[error("DataFrame operation failed: {message}")]
    DataFrame { message: String },
}

impl From<polars::prelude::PolarsError> for IngestError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        Self::DataFrame {
            message: err.to_string(),
        }
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;
