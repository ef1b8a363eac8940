//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while validating or (de)serializing documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A field name uses a reserved character (`$` prefix or embedded `.`).
    #[error("invalid field name: {name}")]
    InvalidField {
        /// The offending field name.
        name: String,
    },

    /// A datafile line could not be decoded into a document.
    #[error("malformed line: {message}")]
    MalformedLine {
        /// Description of the decoding failure.
        message: String,
    },
}

impl CodecError {
    /// Create an invalid field error.
    pub fn invalid_field(name: impl Into<String>) -> Self {
        Self::InvalidField { name: name.into() }
    }

    /// Create a malformed line error.
    pub fn malformed_line(message: impl Into<String>) -> Self {
        Self::MalformedLine {
            message: message.into(),
        }
    }
}
