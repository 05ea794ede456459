//! Error types for store operations.

use recsync_model::{ModelError, RecordId};
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by an object store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record or object was expected but is missing.
    #[error("not found: {id}")]
    NotFound {
        /// The missing record.
        id: RecordId,
    },

    /// The store contents are corrupted. Fatal; never retried.
    #[error("store corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// An object failed validation against its schema.
    #[error("validation failed: {0}")]
    Validation(#[from] ModelError),

    /// Encoding or decoding persisted state failed.
    #[error("codec error: {message}")]
    Codec {
        /// Error message.
        message: String,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        StoreError::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        StoreError::Codec {
            message: message.into(),
        }
    }

    /// Returns true if the error means the store cannot be used any more.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Corrupted { .. })
    }
}
