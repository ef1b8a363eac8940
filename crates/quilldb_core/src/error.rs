//! Error types for QuillDB core.

use std::io;
use thiserror::Error;

/// Result type for datastore operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in QuillDB operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Document model error (reserved field name or malformed datafile line).
    #[error("codec error: {0}")]
    Codec(#[from] quilldb_codec::CodecError),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] quilldb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A query uses an unknown operator or a malformed operand.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },

    /// An update uses an unknown modifier, a wrong operand shape, or would
    /// change `_id`.
    #[error("invalid update: {message}")]
    InvalidUpdate {
        /// Description of the problem.
        message: String,
    },

    /// A projection mixes include and exclude modes.
    #[error("invalid projection: {message}")]
    InvalidProjection {
        /// Description of the problem.
        message: String,
    },

    /// A unique index rejected a key already present for another document.
    #[error("unique constraint violated on index {index}: key {key}")]
    UniqueViolated {
        /// Rendered form of the offending key.
        key: String,
        /// Name of the index that rejected the key.
        index: String,
    },

    /// Too many corrupt lines were found while loading the datafile.
    #[error(
        "datafile corruption: {corrupt} of {total} lines unreadable (threshold {threshold})"
    )]
    LoadCorrupted {
        /// Number of undecodable lines.
        corrupt: usize,
        /// Total number of non-empty lines.
        total: usize,
        /// The configured corruption threshold.
        threshold: f64,
    },

    /// The datastore's load failed and it no longer accepts operations.
    #[error("datastore did not load; operations are rejected")]
    NotLoaded,

    /// The datastore has shut down.
    #[error("datastore is closed")]
    Closed,
}

impl DbError {
    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates an invalid update error.
    pub fn invalid_update(message: impl Into<String>) -> Self {
        Self::InvalidUpdate {
            message: message.into(),
        }
    }

    /// Creates an invalid projection error.
    pub fn invalid_projection(message: impl Into<String>) -> Self {
        Self::InvalidProjection {
            message: message.into(),
        }
    }

    /// Creates a unique violation error.
    pub fn unique_violated(key: impl Into<String>, index: impl Into<String>) -> Self {
        Self::UniqueViolated {
            key: key.into(),
            index: index.into(),
        }
    }
}
