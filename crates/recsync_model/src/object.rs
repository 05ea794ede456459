//! Observed domain objects and the declared syncable surface.

use crate::conflict::ConflictPolicy;
use crate::error::{ModelError, ModelResult};
use crate::hash::ContentHash;
use crate::id::RecordId;
use crate::metadata::HashInput;
use crate::schema::TypeSchema;
use crate::value::FieldValue;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};

/// Snapshot of a domain object as the host store holds it.
///
/// The sync core never owns domain entities. It reads and writes them
/// through this representation: every field by name, the contents of the
/// declared file slots, and relationships expressed as record IDs rather
/// than object references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncObject {
    /// Identity of the object.
    pub id: RecordId,
    /// All field values, syncable and incidental.
    pub fields: BTreeMap<String, FieldValue>,
    /// File slot contents.
    pub files: BTreeMap<String, Bytes>,
    /// Relationship key to target record.
    pub relationships: BTreeMap<String, RecordId>,
}

impl SyncObject {
    /// Creates an empty object.
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
            files: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// Sets a field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets a file slot.
    pub fn with_file(mut self, slot: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        self.files.insert(slot.into(), contents.into());
        self
    }

    /// Sets a relationship.
    pub fn with_relationship(mut self, key: impl Into<String>, target: RecordId) -> Self {
        self.relationships.insert(key.into(), target);
        self
    }

    /// Returns a field value.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Returns a required text field.
    pub fn text(&self, name: &str) -> ModelResult<&str> {
        self.fields
            .get(name)
            .ok_or_else(|| ModelError::missing_field(self.id.record_type(), name))?
            .as_text()
            .ok_or_else(|| ModelError::invalid_field(name, "expected text"))
    }

    /// Returns the names of fields, file slots and relationships whose
    /// values differ between `previous` and `self`.
    ///
    /// Keys present on only one side count as changed.
    pub fn changed_keys(&self, previous: &SyncObject) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        diff_maps(&previous.fields, &self.fields, &mut changed);
        diff_maps(&previous.files, &self.files, &mut changed);
        diff_maps(&previous.relationships, &self.relationships, &mut changed);
        changed
    }

    /// Returns every key the object carries.
    pub fn all_keys(&self) -> BTreeSet<String> {
        self.fields
            .keys()
            .chain(self.files.keys())
            .chain(self.relationships.keys())
            .cloned()
            .collect()
    }

    /// Hashes each populated file slot.
    pub fn file_hashes(&self) -> BTreeMap<String, ContentHash> {
        self.files
            .iter()
            .map(|(slot, bytes)| (slot.clone(), ContentHash::of_bytes(bytes)))
            .collect()
    }

    /// Computes the content hash over the syncable surface declared by
    /// `schema`: syncable fields, declared file slots and declared
    /// relationships. Incidental fields do not contribute.
    pub fn content_hash(&self, schema: &TypeSchema) -> ModelResult<ContentHash> {
        let files = self
            .files
            .iter()
            .filter(|(slot, _)| schema.has_file(slot))
            .map(|(slot, bytes)| (slot.as_str(), ContentHash::of_bytes(bytes)))
            .collect();
        HashInput::new(&self.id, schema, &self.fields, files, &self.relationships).digest()
    }
}

fn diff_maps<V: PartialEq>(
    before: &BTreeMap<String, V>,
    after: &BTreeMap<String, V>,
    changed: &mut BTreeSet<String>,
) {
    for (key, value) in after {
        if before.get(key) != Some(value) {
            changed.insert(key.clone());
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            changed.insert(key.clone());
        }
    }
}

/// A domain type that participates in sync.
///
/// Each type declares its syncable surface statically. The sync core
/// works on `SyncObject` snapshots; this trait converts between a typed
/// value and its snapshot.
pub trait Syncable: Sized {
    /// Record type name shared by the local and the remote store.
    fn syncable_type() -> &'static str;

    /// Name of the field that holds the identifier.
    fn primary_key() -> &'static str;

    /// Names of the fields whose changes are synced.
    fn syncable_fields() -> &'static [&'static str];

    /// Names of the declared file slots.
    fn syncable_files() -> &'static [&'static str] {
        &[]
    }

    /// Names of the declared relationships.
    fn relationship_keys() -> &'static [&'static str] {
        &[]
    }

    /// Conflict policy applied when both sides changed.
    fn conflict_policy() -> ConflictPolicy {
        ConflictPolicy::Conflict
    }

    /// Identifier of this value.
    fn identifier(&self) -> String;

    /// All field values, including incidental ones.
    fn field_values(&self) -> BTreeMap<String, FieldValue>;

    /// Contents of populated file slots.
    fn file_contents(&self) -> BTreeMap<String, Bytes> {
        BTreeMap::new()
    }

    /// Relationship targets of this value.
    fn syncable_relationships(&self) -> BTreeMap<String, RecordId> {
        BTreeMap::new()
    }

    /// Rebuilds a value from its snapshot.
    fn from_object(object: &SyncObject) -> ModelResult<Self>;

    /// Record ID of this value.
    fn record_id(&self) -> RecordId {
        RecordId::new(Self::syncable_type(), self.identifier())
    }

    /// Schema built from the declarations above.
    fn schema() -> TypeSchema {
        TypeSchema::new(Self::syncable_type(), Self::primary_key())
            .with_fields(Self::syncable_fields().iter().copied())
            .with_files(Self::syncable_files().iter().copied())
            .with_relationships(Self::relationship_keys().iter().copied())
            .with_conflict_policy(Self::conflict_policy())
    }

    /// Snapshot of this value.
    fn to_object(&self) -> SyncObject {
        let mut fields = self.field_values();
        fields.insert(
            Self::primary_key().to_string(),
            FieldValue::Text(self.identifier()),
        );
        SyncObject {
            id: self.record_id(),
            fields,
            files: self.file_contents(),
            relationships: self.syncable_relationships(),
        }
    }
}
