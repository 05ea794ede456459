//! Record metadata exchanged with the remote service.

use crate::error::{ModelError, ModelResult};
use crate::file::RemoteFile;
use crate::hash::ContentHash;
use crate::id::RecordId;
use crate::schema::TypeSchema;
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The serialized form of a record on the remote side.
///
/// Carries the syncable field values, the file manifest and the
/// relationships as record IDs (never object graphs). Encoded as CBOR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Identity of the record.
    pub record_id: RecordId,
    /// Syncable field values.
    pub fields: BTreeMap<String, FieldValue>,
    /// Uploaded files, one per populated slot.
    pub files: Vec<RemoteFile>,
    /// Relationship key to target record.
    pub relationships: BTreeMap<String, RecordId>,
    /// True while some relationship target has not been uploaded yet.
    pub locked: bool,
}

impl RecordMetadata {
    /// Creates metadata with no fields, files or relationships.
    pub fn new(record_id: RecordId) -> Self {
        Self {
            record_id,
            fields: BTreeMap::new(),
            files: Vec::new(),
            relationships: BTreeMap::new(),
            locked: false,
        }
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> ModelResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| ModelError::encoding_failed(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> ModelResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ModelError::decoding_failed(e.to_string()))
    }

    /// Returns the manifest entry for a file slot.
    pub fn file(&self, slot: &str) -> Option<&RemoteFile> {
        self.files.iter().find(|file| file.identifier == slot)
    }

    /// Computes the content hash of the record this metadata describes.
    ///
    /// File hashes come from the manifest, so no file content is needed.
    /// Produces the same digest as `SyncObject::content_hash` for an object
    /// with equal syncable content.
    pub fn content_hash(&self, schema: &TypeSchema) -> ModelResult<ContentHash> {
        let files = self
            .files
            .iter()
            .filter(|file| schema.has_file(&file.identifier))
            .map(|file| (file.identifier.as_str(), file.content_hash))
            .collect();
        HashInput::new(
            &self.record_id,
            schema,
            &self.fields,
            files,
            &self.relationships,
        )
        .digest()
    }
}

/// Incremental change to remote metadata that does not re-upload the record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPatch {
    /// New value of the lock flag.
    pub locked: Option<bool>,
    /// New display name.
    pub display_name: Option<String>,
    /// Entries to merge into the free-form metadata map.
    pub metadata: BTreeMap<String, String>,
}

impl MetadataPatch {
    /// A patch that clears the lock flag.
    pub fn unlock() -> Self {
        Self {
            locked: Some(false),
            ..Self::default()
        }
    }

    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.locked.is_none() && self.display_name.is_none() && self.metadata.is_empty()
    }
}

/// Canonical input to the record content hash.
///
/// Map ordering is fixed by `BTreeMap`, so the CBOR encoding and with it
/// the digest are deterministic.
#[derive(Serialize)]
pub(crate) struct HashInput<'a> {
    record_type: &'a str,
    identifier: &'a str,
    fields: BTreeMap<&'a str, &'a FieldValue>,
    files: BTreeMap<&'a str, ContentHash>,
    relationships: BTreeMap<&'a str, &'a RecordId>,
}

impl<'a> HashInput<'a> {
    pub(crate) fn new(
        id: &'a RecordId,
        schema: &TypeSchema,
        fields: &'a BTreeMap<String, FieldValue>,
        files: BTreeMap<&'a str, ContentHash>,
        relationships: &'a BTreeMap<String, RecordId>,
    ) -> Self {
        Self {
            record_type: id.record_type(),
            identifier: id.identifier(),
            fields: fields
                .iter()
                .filter(|(name, _)| schema.has_field(name))
                .map(|(name, value)| (name.as_str(), value))
                .collect(),
            files,
            relationships: relationships
                .iter()
                .filter(|(key, _)| schema.has_relationship(key))
                .map(|(key, target)| (key.as_str(), target))
                .collect(),
        }
    }

    pub(crate) fn digest(&self) -> ModelResult<ContentHash> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| ModelError::encoding_failed(e.to_string()))?;
        Ok(ContentHash::of_bytes(&bytes))
    }
}
