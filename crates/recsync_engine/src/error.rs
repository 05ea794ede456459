//! Error types for the sync engine.
//!
//! One error type per layer: [`ServiceError`] for remote calls,
//! [`FileError`] for a single file slot, [`RecordError`] for one record and
//! [`SyncError`] for a whole run.

use crate::state::Stage;
use recsync_model::{ModelError, RecordId};
use recsync_store::StoreError;
use thiserror::Error;

/// Result type for remote calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type for per-record operations.
pub type RecordResult<T> = Result<T, RecordError>;

/// Result type for sync runs.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors reported by the remote service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Too many requests; retried with backoff.
    #[error("rate limited")]
    RateLimited,

    /// Credentials missing or expired; retried once after reauthentication.
    #[error("authentication expired")]
    AuthExpired,

    /// The requested item does not exist remotely.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// The service rejected or returned malformed data.
    #[error("invalid data: {message}")]
    InvalidData {
        /// Error message.
        message: String,
    },

    /// The change token is stale or unknown.
    #[error("change token rejected")]
    InvalidToken,

    /// Network or transport failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// The call was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl ServiceError {
    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        ServiceError::NotFound { what: what.into() }
    }

    /// Creates an invalid-data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        ServiceError::InvalidData {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        ServiceError::Transport {
            message: message.into(),
        }
    }

    /// Returns true for the not-found case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound { .. })
    }
}

impl From<ModelError> for ServiceError {
    fn from(err: ModelError) -> Self {
        ServiceError::invalid_data(err.to_string())
    }
}

/// Classification of a file failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileErrorKind {
    /// The failure could not be classified.
    Unknown,
    /// The file does not exist remotely.
    DoesNotExist,
    /// Any other failure.
    Other,
}

/// Failure of one file slot within a record transfer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("file `{slot}` failed ({kind:?}): {message}")]
pub struct FileError {
    /// Slot the file belongs to.
    pub slot: String,
    /// Failure classification.
    pub kind: FileErrorKind,
    /// Error message.
    pub message: String,
}

impl FileError {
    /// Creates a file error.
    pub fn new(slot: impl Into<String>, kind: FileErrorKind, message: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            kind,
            message: message.into(),
        }
    }

    /// Classifies a service failure for `slot`.
    pub fn from_service(slot: impl Into<String>, err: &ServiceError) -> Self {
        let kind = match err {
            ServiceError::NotFound { .. } => FileErrorKind::DoesNotExist,
            ServiceError::Transport { .. }
            | ServiceError::InvalidData { .. }
            | ServiceError::RateLimited
            | ServiceError::AuthExpired => FileErrorKind::Other,
            ServiceError::InvalidToken | ServiceError::Cancelled => FileErrorKind::Unknown,
        };
        Self::new(slot, kind, err.to_string())
    }
}

/// Classification of a record failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordErrorKind {
    /// The remote copy is locked with no readable fallback.
    Locked,
    /// The record or its object no longer exists.
    DoesNotExist,
    /// Syncing is disabled for the record.
    SyncingDisabled,
    /// The record is conflicted.
    Conflicted,
    /// Some files failed.
    FilesFailed,
    /// Anything else.
    Other,
}

/// Failure of one record within a stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    /// The remote copy is locked and has no earlier unlocked version.
    #[error("record is locked remotely")]
    Locked,

    /// The record or its object no longer exists.
    #[error("record does not exist")]
    DoesNotExist,

    /// Syncing is disabled for the record.
    #[error("syncing is disabled for the record")]
    SyncingDisabled,

    /// The record is conflicted and needs resolution.
    #[error("record is conflicted")]
    Conflicted,

    /// One or more files failed; the others were kept.
    #[error("{} file(s) failed", .0.len())]
    FilesFailed(Vec<FileError>),

    /// A relationship target could not be resolved.
    #[error("relationship `{key}` target {target} is unavailable")]
    UnresolvedRelationship {
        /// Relationship key.
        key: String,
        /// Missing target.
        target: RecordId,
    },

    /// A remote call failed.
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// The object store failed.
    #[error("store error: {message}")]
    Store {
        /// Error message.
        message: String,
    },

    /// The record data is invalid.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// The stage aborted before the record's result was persisted.
    #[error("stage {stage} aborted: {message}")]
    Aborted {
        /// Stage that aborted.
        stage: Stage,
        /// Stage error message.
        message: String,
    },

    /// The run was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl RecordError {
    /// Returns the failure classification.
    pub fn kind(&self) -> RecordErrorKind {
        match self {
            RecordError::Locked => RecordErrorKind::Locked,
            RecordError::DoesNotExist => RecordErrorKind::DoesNotExist,
            RecordError::SyncingDisabled => RecordErrorKind::SyncingDisabled,
            RecordError::Conflicted => RecordErrorKind::Conflicted,
            RecordError::FilesFailed(_) => RecordErrorKind::FilesFailed,
            RecordError::Service(ServiceError::NotFound { .. }) => RecordErrorKind::DoesNotExist,
            RecordError::UnresolvedRelationship { .. }
            | RecordError::Service(_)
            | RecordError::Store { .. }
            | RecordError::Model(_)
            | RecordError::Aborted { .. }
            | RecordError::Cancelled => RecordErrorKind::Other,
        }
    }

    /// Failed files, empty unless this is a file failure.
    pub fn failed_files(&self) -> &[FileError] {
        match self {
            RecordError::FilesFailed(files) => files,
            _ => &[],
        }
    }
}

impl From<StoreError> for RecordError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => RecordError::DoesNotExist,
            other => RecordError::Store {
                message: other.to_string(),
            },
        }
    }
}

/// Errors that abort a whole sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Reauthentication did not restore access.
    #[error("authentication failed: {0}")]
    Authentication(#[source] ServiceError),

    /// Fetching remote changes failed.
    #[error("fetch failed: {0}")]
    Fetch(#[source] ServiceError),

    /// The object store failed. Corruption is fatal.
    #[error("database error: {0}")]
    Database(#[from] StoreError),

    /// Another run is in flight.
    #[error("a sync run is already in progress")]
    AlreadyRunning,

    /// The run was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Classifies a failed remote fetch.
    pub fn from_fetch(err: ServiceError) -> Self {
        match err {
            ServiceError::AuthExpired => SyncError::Authentication(err),
            ServiceError::Cancelled => SyncError::Cancelled,
            other => SyncError::Fetch(other),
        }
    }

    /// Returns true if the store can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Database(err) if err.is_fatal())
    }
}
