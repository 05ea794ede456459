//! Per-record transfer operations.
//!
//! Each operation works on one managed record and returns either the
//! writes that persist its success or a [`RecordFailure`] carrying the
//! error plus any writes worth keeping anyway (uploaded files, cached
//! downloads). Nothing is written directly: the pipeline buffers every
//! result of a stage into one transaction.

pub(crate) mod delete;
pub(crate) mod download;
pub(crate) mod metadata;
pub(crate) mod upload;

use crate::call::ServiceCaller;
use crate::error::{RecordError, ServiceError};
use recsync_model::{
    ModelError, RecordId, RecordMetadata, RecordStatus, RemoteFile, SchemaRegistry, SyncObject,
    TypeSchema,
};
use recsync_store::{ObjectStore, StoreError, StoreResult, Write};

/// Shared collaborators of the transfer operations.
pub(crate) struct TransferContext<'a> {
    pub store: &'a dyn ObjectStore,
    pub registry: &'a SchemaRegistry,
    pub caller: &'a ServiceCaller,
}

/// Writes produced by a successful record operation.
#[derive(Debug, Default)]
pub(crate) struct RecordChanges {
    pub writes: Vec<Write>,
}

impl RecordChanges {
    pub fn new(writes: Vec<Write>) -> Self {
        Self { writes }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// A failed record operation.
#[derive(Debug)]
pub(crate) struct RecordFailure {
    pub error: RecordError,
    /// Writes persisted despite the failure.
    pub salvage: Vec<Write>,
}

impl RecordFailure {
    pub fn with_salvage(error: impl Into<RecordError>, salvage: Vec<Write>) -> Self {
        Self {
            error: error.into(),
            salvage,
        }
    }
}

impl From<RecordError> for RecordFailure {
    fn from(error: RecordError) -> Self {
        Self {
            error,
            salvage: Vec::new(),
        }
    }
}

impl From<ServiceError> for RecordFailure {
    fn from(error: ServiceError) -> Self {
        let error = match error {
            ServiceError::Cancelled => RecordError::Cancelled,
            other => RecordError::Service(other),
        };
        error.into()
    }
}

impl From<StoreError> for RecordFailure {
    fn from(error: StoreError) -> Self {
        RecordError::from(error).into()
    }
}

impl From<ModelError> for RecordFailure {
    fn from(error: ModelError) -> Self {
        RecordError::Model(error).into()
    }
}

pub(crate) type TransferResult<T> = Result<T, RecordFailure>;

/// Builds the metadata sent for `object`: syncable fields plus the
/// primary key, the file manifest and declared relationships.
pub(crate) fn outgoing_metadata(
    object: &SyncObject,
    schema: &TypeSchema,
    files: Vec<RemoteFile>,
    locked: bool,
) -> RecordMetadata {
    let mut metadata = RecordMetadata::new(object.id.clone());
    metadata.fields = object
        .fields
        .iter()
        .filter(|(name, _)| schema.has_field(name) || name.as_str() == schema.primary_key())
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    metadata.relationships = object
        .relationships
        .iter()
        .filter(|(key, _)| schema.has_relationship(key))
        .map(|(key, target)| (key.clone(), target.clone()))
        .collect();
    metadata.files = files;
    metadata.locked = locked;
    metadata
}

/// Declared relationships of `object` whose target has no live remote copy.
pub(crate) fn missing_relationship_targets(
    store: &dyn ObjectStore,
    schema: &TypeSchema,
    object: &SyncObject,
) -> StoreResult<Vec<(String, RecordId)>> {
    let mut missing = Vec::new();
    for (key, target) in &object.relationships {
        if !schema.has_relationship(key) {
            continue;
        }
        let uploaded = store
            .record(target)?
            .and_then(|record| record.remote)
            .is_some_and(|remote| remote.status != RecordStatus::Deleted);
        if !uploaded {
            missing.push((key.clone(), target.clone()));
        }
    }
    Ok(missing)
}
