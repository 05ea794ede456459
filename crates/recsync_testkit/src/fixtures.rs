//! Sample domain types and the engine test harness.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use recsync_engine::{MemoryService, SyncConfig, SyncEngine, SyncOutcome};
use recsync_model::{
    ConflictPolicy, FieldValue, ManagedRecord, ModelResult, RecordId, SchemaRegistry, SyncObject,
    Syncable, TypeSchema,
};
use recsync_store::{CommitOrigin, MemoryStore, ObjectStore};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A note with two file slots and an optional folder.
///
/// `viewed` is incidental: it is stored but never synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    /// Identifier.
    pub id: String,
    /// Synced title.
    pub title: String,
    /// Synced body.
    pub body: String,
    /// Local view counter.
    pub viewed: i64,
    /// First file slot.
    pub attachment: Option<Bytes>,
    /// Second file slot.
    pub cover: Option<Bytes>,
    /// Identifier of the containing folder.
    pub folder: Option<String>,
}

impl Note {
    /// Creates a note with a title and nothing else.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: String::new(),
            viewed: 0,
            attachment: None,
            cover: None,
            folder: None,
        }
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the attachment.
    pub fn with_attachment(mut self, contents: impl Into<Bytes>) -> Self {
        self.attachment = Some(contents.into());
        self
    }

    /// Sets the cover.
    pub fn with_cover(mut self, contents: impl Into<Bytes>) -> Self {
        self.cover = Some(contents.into());
        self
    }

    /// Places the note in a folder.
    pub fn in_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    /// Record ID of a note.
    pub fn id_of(id: &str) -> RecordId {
        RecordId::new(Self::syncable_type(), id)
    }
}

impl Syncable for Note {
    fn syncable_type() -> &'static str {
        "note"
    }

    fn primary_key() -> &'static str {
        "id"
    }

    fn syncable_fields() -> &'static [&'static str] {
        &["title", "body"]
    }

    fn syncable_files() -> &'static [&'static str] {
        &["attachment", "cover"]
    }

    fn relationship_keys() -> &'static [&'static str] {
        &["folder"]
    }

    fn identifier(&self) -> String {
        self.id.clone()
    }

    fn field_values(&self) -> BTreeMap<String, FieldValue> {
        BTreeMap::from([
            ("title".to_string(), FieldValue::from(self.title.as_str())),
            ("body".to_string(), FieldValue::from(self.body.as_str())),
            ("viewed".to_string(), FieldValue::from(self.viewed)),
        ])
    }

    fn file_contents(&self) -> BTreeMap<String, Bytes> {
        let mut files = BTreeMap::new();
        if let Some(attachment) = &self.attachment {
            files.insert("attachment".to_string(), attachment.clone());
        }
        if let Some(cover) = &self.cover {
            files.insert("cover".to_string(), cover.clone());
        }
        files
    }

    fn syncable_relationships(&self) -> BTreeMap<String, RecordId> {
        self.folder
            .iter()
            .map(|folder| ("folder".to_string(), Folder::id_of(folder)))
            .collect()
    }

    fn from_object(object: &SyncObject) -> ModelResult<Self> {
        Ok(Self {
            id: object.text("id")?.to_string(),
            title: object.text("title")?.to_string(),
            body: object
                .field("body")
                .and_then(FieldValue::as_text)
                .unwrap_or_default()
                .to_string(),
            viewed: object
                .field("viewed")
                .and_then(FieldValue::as_integer)
                .unwrap_or(0),
            attachment: object.files.get("attachment").cloned(),
            cover: object.files.get("cover").cloned(),
            folder: object
                .relationships
                .get("folder")
                .map(|target| target.identifier().to_string()),
        })
    }
}

/// A folder holding notes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    /// Identifier.
    pub id: String,
    /// Synced name.
    pub name: String,
}

impl Folder {
    /// Creates a folder.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Record ID of a folder.
    pub fn id_of(id: &str) -> RecordId {
        RecordId::new(Self::syncable_type(), id)
    }
}

impl Syncable for Folder {
    fn syncable_type() -> &'static str {
        "folder"
    }

    fn primary_key() -> &'static str {
        "id"
    }

    fn syncable_fields() -> &'static [&'static str] {
        &["name"]
    }

    fn conflict_policy() -> ConflictPolicy {
        ConflictPolicy::Newest
    }

    fn identifier(&self) -> String {
        self.id.clone()
    }

    fn field_values(&self) -> BTreeMap<String, FieldValue> {
        BTreeMap::from([("name".to_string(), FieldValue::from(self.name.as_str()))])
    }

    fn from_object(object: &SyncObject) -> ModelResult<Self> {
        Ok(Self {
            id: object.text("id")?.to_string(),
            name: object.text("name")?.to_string(),
        })
    }
}

/// Registry with [`Note`] and [`Folder`].
pub fn sample_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register_type::<Note>().register_type::<Folder>();
    registry
}

/// Registry with [`Folder`] and a [`Note`] schema overridden by `note`.
pub fn registry_with_note(note: TypeSchema) -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register(note).register_type::<Folder>();
    registry
}

/// Retry settings for tests: no waiting on rate limits.
pub fn test_config() -> SyncConfig {
    SyncConfig::default().with_retry(recsync_engine::RetryConfig::no_retry())
}

/// Flips the syncing flag of a tracked record directly in `store`, as
/// another writer sharing the store would while a sync is running.
pub fn set_syncing_in_store(store: &MemoryStore, id: &RecordId, enabled: bool) {
    let mut record = store
        .record(id)
        .expect("Failed to read record")
        .expect("Record is not tracked");
    record.is_syncing_enabled = enabled;
    let mut txn = store.begin().expect("Failed to begin transaction");
    txn.put_record(record);
    store
        .commit(txn, CommitOrigin::Sync)
        .expect("Failed to commit record");
}

/// An engine wired to a memory store and a memory service.
pub struct TestHarness {
    /// The local store.
    pub store: Arc<MemoryStore>,
    /// The remote service, possibly shared with other harnesses.
    pub service: Arc<MemoryService>,
    /// The engine under test.
    pub engine: SyncEngine,
}

impl TestHarness {
    /// Creates a harness with the sample registry and test configuration.
    pub fn new() -> Self {
        Self::with_service(Arc::new(MemoryService::new()), sample_registry(), test_config())
    }

    /// Creates a harness whose remote clock starts at `start`.
    pub fn with_remote_clock(start: DateTime<Utc>) -> Self {
        Self::with_service(
            Arc::new(MemoryService::with_clock(start)),
            sample_registry(),
            test_config(),
        )
    }

    /// Creates a harness over an existing service.
    pub fn with_service(
        service: Arc<MemoryService>,
        registry: SchemaRegistry,
        config: SyncConfig,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(config, registry, store.clone(), service.clone());
        Self {
            store,
            service,
            engine,
        }
    }

    /// A second device: fresh store and engine, same remote.
    pub fn device(&self) -> Self {
        Self::with_service(
            Arc::clone(&self.service),
            self.engine.registry().clone(),
            self.engine.config().clone(),
        )
    }

    /// Writes a value as the host application.
    pub fn put<T: Syncable>(&self, value: &T) {
        self.store
            .put_object(value.to_object())
            .expect("Failed to write object");
    }

    /// Deletes an object as the host application.
    pub fn delete(&self, id: &RecordId) {
        self.store
            .delete_object(id)
            .expect("Failed to delete object");
    }

    /// Reads a value back from the store.
    pub fn get<T: Syncable>(&self, id: &RecordId) -> Option<T> {
        self.store
            .object(id)
            .expect("Failed to read object")
            .map(|object| T::from_object(&object).expect("Failed to decode object"))
    }

    /// The managed record for `id`.
    pub fn record(&self, id: &RecordId) -> Option<ManagedRecord> {
        self.engine.record(id).expect("Failed to read record")
    }

    /// Runs one sync.
    pub async fn sync(&self) -> SyncOutcome {
        self.engine.sync().await.expect("Sync already running")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
