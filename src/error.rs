//! Error types for the index service

use thiserror::Error;

/// Result type alias for index service operations
pub type Result<T> = std::result::Result<T, IndexServiceError>;

/// Error types that can occur while serving the vector index.
///
/// Absent ids and unknown keys are not errors; they surface as
/// [`RemoveOutcome::NotPresent`](crate::service::RemoveOutcome) and empty
/// search results.
#[derive(Error, Debug)]
pub enum IndexServiceError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector: {reason}")]
    InvalidVector { reason: String },

    #[error("Row count mismatch: {embeddings} embeddings but {ids} ids")]
    RowCountMismatch { embeddings: usize, ids: usize },

    #[error("Malformed {file} at line {line}: {reason}")]
    MalformedRow {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("Search by key requested but no key table is loaded")]
    KeysNotLoaded,

    #[error("Failed to fetch {path}: {reason}")]
    StorageFetch { path: String, reason: String },

    #[error("Failed to persist index to {path}: {reason}")]
    Persistence { path: String, reason: String },

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Incompatible index file {path}: {reason}")]
    IncompatibleIndex { path: String, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Index error: {0}")]
    IndexError(String),
}

impl IndexServiceError {
    /// Whether the request was rejected before touching the index.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            IndexServiceError::DimensionMismatch { .. }
                | IndexServiceError::InvalidVector { .. }
                | IndexServiceError::RowCountMismatch { .. }
                | IndexServiceError::MalformedRow { .. }
                | IndexServiceError::KeysNotLoaded
                | IndexServiceError::IncompatibleIndex { .. }
        )
    }
}
