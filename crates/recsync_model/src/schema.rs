//! Declared syncable surface per record type.

use crate::conflict::ConflictPolicy;
use crate::error::{ModelError, ModelResult};
use crate::object::{SyncObject, Syncable};
use std::collections::{BTreeMap, BTreeSet};

/// What the sync core may observe on objects of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSchema {
    record_type: String,
    primary_key: String,
    fields: BTreeSet<String>,
    files: BTreeSet<String>,
    relationships: BTreeSet<String>,
    conflict_policy: ConflictPolicy,
    syncing_enabled: bool,
}

impl TypeSchema {
    /// Creates a schema with no syncable keys.
    pub fn new(record_type: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            primary_key: primary_key.into(),
            fields: BTreeSet::new(),
            files: BTreeSet::new(),
            relationships: BTreeSet::new(),
            conflict_policy: ConflictPolicy::Conflict,
            syncing_enabled: true,
        }
    }

    /// Declares syncable fields.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Declares file slots.
    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    /// Declares relationship keys.
    pub fn with_relationships<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relationships.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets whether new records of this type start with syncing enabled.
    pub fn with_syncing_enabled(mut self, enabled: bool) -> Self {
        self.syncing_enabled = enabled;
        self
    }

    /// Returns the record type name.
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Returns the primary key field name.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Returns the syncable field names.
    pub fn fields(&self) -> &BTreeSet<String> {
        &self.fields
    }

    /// Returns the file slot names.
    pub fn files(&self) -> &BTreeSet<String> {
        &self.files
    }

    /// Returns the relationship keys.
    pub fn relationships(&self) -> &BTreeSet<String> {
        &self.relationships
    }

    /// Returns the conflict policy.
    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.conflict_policy
    }

    /// Returns whether new records start with syncing enabled.
    pub fn syncing_enabled(&self) -> bool {
        self.syncing_enabled
    }

    /// Returns true if `name` is a syncable field.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains(name)
    }

    /// Returns true if `slot` is a declared file slot.
    pub fn has_file(&self, slot: &str) -> bool {
        self.files.contains(slot)
    }

    /// Returns true if `key` is a declared relationship.
    pub fn has_relationship(&self, key: &str) -> bool {
        self.relationships.contains(key)
    }

    /// Returns true if `key` names any syncable field, file or relationship.
    pub fn is_syncable_key(&self, key: &str) -> bool {
        self.has_field(key) || self.has_file(key) || self.has_relationship(key)
    }

    /// Returns true if any of `changed` is a syncable key.
    pub fn touches_syncable(&self, changed: &BTreeSet<String>) -> bool {
        changed.iter().any(|key| self.is_syncable_key(key))
    }

    /// Validates that `object` can be tracked under this schema.
    pub fn validate(&self, object: &SyncObject) -> ModelResult<()> {
        if object.id.record_type() != self.record_type {
            return Err(ModelError::invalid_field(
                "type",
                format!(
                    "object type {} does not match schema {}",
                    object.id.record_type(),
                    self.record_type
                ),
            ));
        }
        if !object.id.is_valid() {
            return Err(ModelError::InvalidIdentifier {
                message: format!("empty identifier for {}", self.record_type),
            });
        }
        if let Some(value) = object.field(&self.primary_key) {
            if value.as_text() != Some(object.id.identifier()) {
                return Err(ModelError::invalid_field(
                    self.primary_key.clone(),
                    "primary key does not match the record identifier",
                ));
            }
        }
        Ok(())
    }
}

/// All registered record types.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<String, TypeSchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema, replacing any previous one for the same type.
    pub fn register(&mut self, schema: TypeSchema) -> &mut Self {
        self.types.insert(schema.record_type.clone(), schema);
        self
    }

    /// Registers the schema declared by a `Syncable` type.
    pub fn register_type<T: Syncable>(&mut self) -> &mut Self {
        self.register(T::schema())
    }

    /// Builder form of `register`.
    pub fn with(mut self, schema: TypeSchema) -> Self {
        self.register(schema);
        self
    }

    /// Returns the schema for a type.
    pub fn get(&self, record_type: &str) -> Option<&TypeSchema> {
        self.types.get(record_type)
    }

    /// Returns the schema for a type or an unknown-type error.
    pub fn require(&self, record_type: &str) -> ModelResult<&TypeSchema> {
        self.get(record_type)
            .ok_or_else(|| ModelError::unknown_type(record_type))
    }

    /// Iterates over registered schemas.
    pub fn iter(&self) -> impl Iterator<Item = &TypeSchema> {
        self.types.values()
    }

    /// Returns true if no types are registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Validates an object against its type's schema.
    pub fn validate(&self, object: &SyncObject) -> ModelResult<()> {
        self.require(object.id.record_type())?.validate(object)
    }
}
