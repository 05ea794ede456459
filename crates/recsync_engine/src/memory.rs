//! In-memory remote service.

use crate::error::{ServiceError, ServiceResult};
use crate::service::{FetchAll, FetchChanges, RemoteEntry, Service};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use recsync_model::{
    ChangeToken, ContentHash, MetadataPatch, RecordId, RecordMetadata, RecordStatus, RemoteFile,
    RemoteRecord, SyncObject, TypeSchema, Version,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use uuid::Uuid;

/// A remote call, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    /// `authenticate`
    Authenticate,
    /// `fetch_all_records`
    FetchAll,
    /// `fetch_changed_records`
    FetchChanges,
    /// `upload_record`
    UploadRecord,
    /// `download_record`
    DownloadRecord,
    /// `upload_file`
    UploadFile,
    /// `download_file`
    DownloadFile,
    /// `delete_file`
    DeleteFile,
    /// `delete_record`
    DeleteRecord,
    /// `update_metadata`
    UpdateMetadata,
    /// `fetch_file_version_history`
    FileHistory,
}

type CallHook = Box<dyn FnOnce() + Send>;

struct StoredRecord {
    id: RecordId,
    record: RemoteRecord,
    revisions: BTreeMap<String, RecordMetadata>,
    changed_at: u64,
}

struct StoredFile {
    contents: Bytes,
    history: Vec<Version>,
}

struct RemoteState {
    records: BTreeMap<String, StoredRecord>,
    identities: BTreeMap<RecordId, String>,
    files: BTreeMap<String, StoredFile>,
    tombstones: BTreeMap<String, u64>,
    sequence: u64,
    epoch: u32,
    clock: DateTime<Utc>,
    auth_expired: bool,
    reauth_fails: bool,
    failures: VecDeque<(Operation, ServiceError)>,
    hooks: VecDeque<(Operation, CallHook)>,
    failing_slots: BTreeSet<String>,
    calls: BTreeMap<Operation, usize>,
}

impl RemoteState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::seconds(1);
        self.clock
    }

    fn next_version(&mut self) -> Version {
        let date = self.tick();
        Version::new(Uuid::new_v4().to_string(), date)
    }

    fn token(&self) -> ChangeToken {
        let mut bytes = Vec::with_capacity(12);
        bytes.extend_from_slice(&self.epoch.to_be_bytes());
        bytes.extend_from_slice(&self.sequence.to_be_bytes());
        ChangeToken::from_bytes(bytes)
    }

    fn parse_token(&self, token: &ChangeToken) -> ServiceResult<u64> {
        let bytes = token.as_bytes();
        if bytes.len() != 12 {
            return Err(ServiceError::InvalidToken);
        }
        let mut epoch = [0u8; 4];
        let mut sequence = [0u8; 8];
        epoch.copy_from_slice(&bytes[..4]);
        sequence.copy_from_slice(&bytes[4..]);
        let sequence = u64::from_be_bytes(sequence);
        if u32::from_be_bytes(epoch) != self.epoch || sequence > self.sequence {
            return Err(ServiceError::InvalidToken);
        }
        Ok(sequence)
    }

    fn store_file(&mut self, slot: &str, contents: Bytes) -> RemoteFile {
        let version = self.next_version();
        let file = RemoteFile {
            identifier: slot.to_string(),
            remote_identifier: Uuid::new_v4().to_string(),
            version_identifier: version.identifier.clone(),
            content_hash: ContentHash::of_bytes(&contents),
            size: contents.len() as u64,
        };
        self.files.insert(
            file.remote_identifier.clone(),
            StoredFile {
                contents,
                history: vec![version],
            },
        );
        file
    }

    fn store_record(&mut self, metadata: &RecordMetadata) -> ServiceResult<RemoteRecord> {
        if !metadata.record_id.is_valid() {
            return Err(ServiceError::invalid_data("record identifier is empty"));
        }
        let version = self.next_version();
        self.sequence += 1;
        let sequence = self.sequence;

        let existing = self
            .identities
            .get(&metadata.record_id)
            .and_then(|remote_id| self.records.get(remote_id))
            .map(|stored| stored.record.clone());

        let (remote_identifier, previous_unlocked_version) = match existing {
            Some(previous) => {
                let fallback = if !metadata.locked {
                    None
                } else if previous.is_locked {
                    previous.previous_unlocked_version
                } else {
                    Some(previous.version)
                };
                (previous.remote_identifier, fallback)
            }
            None => (Uuid::new_v4().to_string(), None),
        };

        let mut record = RemoteRecord::new(remote_identifier.clone(), RecordStatus::Normal, version);
        record.is_locked = metadata.locked;
        record.previous_unlocked_version = previous_unlocked_version;
        record.author = Some("memory".to_string());

        let stored = self
            .records
            .entry(remote_identifier.clone())
            .or_insert_with(|| StoredRecord {
                id: metadata.record_id.clone(),
                record: record.clone(),
                revisions: BTreeMap::new(),
                changed_at: sequence,
            });
        stored
            .revisions
            .insert(record.version.identifier.clone(), metadata.clone());
        record.display_name = stored.record.display_name.clone();
        record.metadata = stored.record.metadata.clone();
        stored.record = record.clone();
        stored.changed_at = sequence;
        self.identities
            .insert(metadata.record_id.clone(), remote_identifier);
        Ok(record)
    }

    fn remove_record(&mut self, remote_identifier: &str) -> bool {
        let Some(stored) = self.records.remove(remote_identifier) else {
            return false;
        };
        self.identities.remove(&stored.id);
        self.sequence += 1;
        self.tombstones
            .insert(remote_identifier.to_string(), self.sequence);
        true
    }
}

/// A complete remote service kept in memory.
///
/// Keeps a change log for incremental fetches, per-record revisions, file
/// contents with version history, and supports failure injection:
/// queued per-operation errors, failing file slots, expired
/// authentication and token invalidation. Hooks can run host code at
/// the start of a call. Every call is counted.
pub struct MemoryService {
    state: Mutex<RemoteState>,
}

impl MemoryService {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self::with_clock(Utc::now())
    }

    /// Creates an empty service whose version dates start at `start`.
    ///
    /// Every remote write advances the clock by one second.
    pub fn with_clock(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(RemoteState {
                records: BTreeMap::new(),
                identities: BTreeMap::new(),
                files: BTreeMap::new(),
                tombstones: BTreeMap::new(),
                sequence: 0,
                epoch: 0,
                clock: start,
                auth_expired: false,
                reauth_fails: false,
                failures: VecDeque::new(),
                hooks: VecDeque::new(),
                failing_slots: BTreeSet::new(),
                calls: BTreeMap::new(),
            }),
        }
    }

    /// Makes the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: Operation, error: ServiceError) {
        self.state.lock().failures.push_back((operation, error));
    }

    /// Runs `hook` at the start of the next call of `operation`, before the
    /// call reads or writes any remote state.
    pub fn on_next_call(&self, operation: Operation, hook: impl FnOnce() + Send + 'static) {
        self.state
            .lock()
            .hooks
            .push_back((operation, Box::new(hook)));
    }

    /// Makes every upload to `slot` fail until cleared.
    pub fn fail_file_slot(&self, slot: impl Into<String>) {
        self.state.lock().failing_slots.insert(slot.into());
    }

    /// Clears queued failures and failing slots.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failures.clear();
        state.failing_slots.clear();
    }

    /// Makes calls fail with `AuthExpired` until the next authentication.
    pub fn expire_auth(&self) {
        self.state.lock().auth_expired = true;
    }

    /// Makes authentication fail.
    pub fn set_reauth_fails(&self, fails: bool) {
        self.state.lock().reauth_fails = fails;
    }

    /// Rejects every change token issued so far.
    pub fn invalidate_tokens(&self) {
        self.state.lock().epoch += 1;
    }

    /// Number of calls of `operation` so far.
    pub fn calls(&self, operation: Operation) -> usize {
        self.state.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Resets every call counter.
    pub fn reset_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of remote records.
    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Number of stored files.
    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }

    /// Current remote state of a record.
    pub fn remote_record(&self, id: &RecordId) -> Option<RemoteRecord> {
        let state = self.state.lock();
        let remote_id = state.identities.get(id)?;
        state.records.get(remote_id).map(|stored| stored.record.clone())
    }

    /// Metadata of the current revision of a record.
    pub fn remote_metadata(&self, id: &RecordId) -> Option<RecordMetadata> {
        let state = self.state.lock();
        let stored = state.records.get(state.identities.get(id)?)?;
        stored
            .revisions
            .get(&stored.record.version.identifier)
            .cloned()
    }

    /// Writes a record as another device would, bypassing failure
    /// injection and call counting.
    pub fn put_remote(
        &self,
        object: &SyncObject,
        schema: &TypeSchema,
    ) -> ServiceResult<RemoteRecord> {
        let mut state = self.state.lock();
        let mut metadata = RecordMetadata::new(object.id.clone());
        metadata.fields = object
            .fields
            .iter()
            .filter(|(name, _)| schema.has_field(name) || *name == schema.primary_key())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        metadata.relationships = object
            .relationships
            .iter()
            .filter(|(key, _)| schema.has_relationship(key))
            .map(|(key, target)| (key.clone(), target.clone()))
            .collect();
        for (slot, contents) in &object.files {
            if schema.has_file(slot) {
                let file = state.store_file(slot, contents.clone());
                metadata.files.push(file);
            }
        }
        state.store_record(&metadata)
    }

    /// Deletes a record as another device would.
    pub fn delete_remote(&self, id: &RecordId) -> bool {
        let mut state = self.state.lock();
        match state.identities.get(id).cloned() {
            Some(remote_id) => state.remove_record(&remote_id),
            None => false,
        }
    }

    /// Publishes a new revision of `id` whose manifest lists one more file
    /// for `slot`, next to the ones already there.
    ///
    /// The file's version history confirms its own version only when
    /// `confirmed` is set; otherwise the history holds an unrelated later
    /// version.
    pub fn add_duplicate_file(
        &self,
        id: &RecordId,
        slot: &str,
        contents: impl Into<Bytes>,
        confirmed: bool,
    ) -> ServiceResult<RemoteFile> {
        let mut state = self.state.lock();
        let mut metadata = {
            let stored = state
                .identities
                .get(id)
                .and_then(|remote_id| state.records.get(remote_id))
                .ok_or_else(|| ServiceError::not_found(format!("record {id}")))?;
            stored
                .revisions
                .get(&stored.record.version.identifier)
                .cloned()
                .ok_or_else(|| ServiceError::invalid_data("current revision is missing"))?
        };
        let file = state.store_file(slot, contents.into());
        if !confirmed {
            let unrelated = state.next_version();
            if let Some(stored) = state.files.get_mut(&file.remote_identifier) {
                stored.history = vec![unrelated];
            }
        }
        metadata.files.push(file.clone());
        state.store_record(&metadata)?;
        Ok(file)
    }

    /// Removes a stored file while leaving every manifest that lists it.
    pub fn remove_file(&self, remote_identifier: &str) -> bool {
        self.state.lock().files.remove(remote_identifier).is_some()
    }

    fn begin(
        &self,
        operation: Operation,
    ) -> ServiceResult<parking_lot::MutexGuard<'_, RemoteState>> {
        let hook = {
            let mut state = self.state.lock();
            state
                .hooks
                .iter()
                .position(|(op, _)| *op == operation)
                .and_then(|index| state.hooks.remove(index))
        };
        if let Some((_, hook)) = hook {
            hook();
        }

        let mut state = self.state.lock();
        *state.calls.entry(operation).or_insert(0) += 1;
        if operation != Operation::Authenticate && state.auth_expired {
            return Err(ServiceError::AuthExpired);
        }
        if let Some(index) = state.failures.iter().position(|(op, _)| *op == operation) {
            if let Some((_, error)) = state.failures.remove(index) {
                return Err(error);
            }
        }
        Ok(state)
    }
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Service for MemoryService {
    async fn authenticate(&self) -> ServiceResult<()> {
        let mut state = self.begin(Operation::Authenticate)?;
        if state.reauth_fails {
            return Err(ServiceError::transport("authentication rejected"));
        }
        state.auth_expired = false;
        Ok(())
    }

    async fn fetch_all_records(&self) -> ServiceResult<FetchAll> {
        let state = self.begin(Operation::FetchAll)?;
        let records = state
            .records
            .values()
            .map(|stored| RemoteEntry::new(stored.id.clone(), stored.record.clone()))
            .collect();
        Ok(FetchAll {
            records,
            token: state.token(),
        })
    }

    async fn fetch_changed_records(&self, token: &ChangeToken) -> ServiceResult<FetchChanges> {
        let state = self.begin(Operation::FetchChanges)?;
        let since = state.parse_token(token)?;
        let updated = state
            .records
            .values()
            .filter(|stored| stored.changed_at > since)
            .map(|stored| RemoteEntry::new(stored.id.clone(), stored.record.clone()))
            .collect();
        let deleted = state
            .tombstones
            .iter()
            .filter(|(_, deleted_at)| **deleted_at > since)
            .map(|(remote_id, _)| remote_id.clone())
            .collect();
        Ok(FetchChanges {
            updated,
            deleted,
            token: state.token(),
        })
    }

    async fn upload_record(&self, metadata: &RecordMetadata) -> ServiceResult<RemoteRecord> {
        let mut state = self.begin(Operation::UploadRecord)?;
        state.store_record(metadata)
    }

    async fn download_record(
        &self,
        remote_identifier: &str,
        version: &Version,
    ) -> ServiceResult<RecordMetadata> {
        let state = self.begin(Operation::DownloadRecord)?;
        state
            .records
            .get(remote_identifier)
            .and_then(|stored| stored.revisions.get(&version.identifier))
            .cloned()
            .ok_or_else(|| ServiceError::not_found(format!("record {remote_identifier}@{version}")))
    }

    async fn upload_file(
        &self,
        _record: &RecordId,
        slot: &str,
        contents: Bytes,
    ) -> ServiceResult<RemoteFile> {
        let mut state = self.begin(Operation::UploadFile)?;
        if state.failing_slots.contains(slot) {
            return Err(ServiceError::transport(format!("upload of `{slot}` interrupted")));
        }
        Ok(state.store_file(slot, contents))
    }

    async fn download_file(&self, file: &RemoteFile) -> ServiceResult<Bytes> {
        let state = self.begin(Operation::DownloadFile)?;
        state
            .files
            .get(&file.remote_identifier)
            .map(|stored| stored.contents.clone())
            .ok_or_else(|| ServiceError::not_found(format!("file {}", file.remote_identifier)))
    }

    async fn delete_file(&self, file: &RemoteFile) -> ServiceResult<()> {
        let mut state = self.begin(Operation::DeleteFile)?;
        state
            .files
            .remove(&file.remote_identifier)
            .map(|_| ())
            .ok_or_else(|| ServiceError::not_found(format!("file {}", file.remote_identifier)))
    }

    async fn delete_record(&self, remote_identifier: &str) -> ServiceResult<()> {
        let mut state = self.begin(Operation::DeleteRecord)?;
        if state.remove_record(remote_identifier) {
            Ok(())
        } else {
            Err(ServiceError::not_found(format!("record {remote_identifier}")))
        }
    }

    async fn update_metadata(
        &self,
        remote_identifier: &str,
        patch: &MetadataPatch,
    ) -> ServiceResult<RemoteRecord> {
        let mut state = self.begin(Operation::UpdateMetadata)?;
        let version = state.next_version();
        state.sequence += 1;
        let sequence = state.sequence;

        let stored = state
            .records
            .get_mut(remote_identifier)
            .ok_or_else(|| ServiceError::not_found(format!("record {remote_identifier}")))?;
        let mut metadata = stored
            .revisions
            .get(&stored.record.version.identifier)
            .cloned()
            .ok_or_else(|| ServiceError::invalid_data("current revision is missing"))?;

        let previous = stored.record.clone();
        let record = &mut stored.record;
        if let Some(locked) = patch.locked {
            metadata.locked = locked;
            record.is_locked = locked;
            record.previous_unlocked_version = match (locked, previous.is_locked) {
                (false, _) => None,
                (true, true) => previous.previous_unlocked_version,
                (true, false) => Some(previous.version),
            };
        }
        if let Some(name) = &patch.display_name {
            record.display_name = Some(name.clone());
        }
        record
            .metadata
            .extend(patch.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        record.version = version;
        stored
            .revisions
            .insert(stored.record.version.identifier.clone(), metadata);
        stored.changed_at = sequence;
        Ok(stored.record.clone())
    }

    async fn fetch_file_version_history(&self, file: &RemoteFile) -> ServiceResult<Vec<Version>> {
        let state = self.begin(Operation::FileHistory)?;
        state
            .files
            .get(&file.remote_identifier)
            .map(|stored| stored.history.clone())
            .ok_or_else(|| ServiceError::not_found(format!("file {}", file.remote_identifier)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn schema() -> TypeSchema {
        TypeSchema::new("note", "id")
            .with_fields(["title"])
            .with_files(["attachment"])
    }

    fn note(id: &str) -> SyncObject {
        SyncObject::new(RecordId::new("note", id))
            .with_field("id", id)
            .with_field("title", "hello")
            .with_field("viewed", 3i64)
            .with_file("attachment", Bytes::from_static(b"bytes"))
    }

    #[tokio::test]
    async fn incremental_fetch_reports_changes_since_token() {
        let service = MemoryService::new();
        service.put_remote(&note("a"), &schema()).unwrap();
        let all = service.fetch_all_records().await.unwrap();
        assert_eq!(all.records.len(), 1);

        service.put_remote(&note("b"), &schema()).unwrap();
        assert!(service.delete_remote(&RecordId::new("note", "a")));
        let changes = service.fetch_changed_records(&all.token).await.unwrap();
        assert_eq!(changes.updated.len(), 1);
        assert_eq!(changes.updated[0].id, RecordId::new("note", "b"));
        assert_eq!(changes.deleted.len(), 1);

        let quiet = service.fetch_changed_records(&changes.token).await.unwrap();
        assert!(quiet.updated.is_empty() && quiet.deleted.is_empty());
    }

    #[tokio::test]
    async fn invalidated_tokens_are_rejected() {
        let service = MemoryService::new();
        let all = service.fetch_all_records().await.unwrap();
        service.invalidate_tokens();
        assert_eq!(
            service.fetch_changed_records(&all.token).await.unwrap_err(),
            ServiceError::InvalidToken
        );
        assert_eq!(
            service
                .fetch_changed_records(&ChangeToken::from_bytes(vec![1]))
                .await
                .unwrap_err(),
            ServiceError::InvalidToken
        );
    }

    #[tokio::test]
    async fn put_remote_keeps_only_declared_surface() {
        let service = MemoryService::new();
        service.put_remote(&note("a"), &schema()).unwrap();
        let metadata = service.remote_metadata(&RecordId::new("note", "a")).unwrap();
        assert!(metadata.fields.contains_key("title"));
        assert!(metadata.fields.contains_key("id"));
        assert!(!metadata.fields.contains_key("viewed"));
        assert_eq!(metadata.files.len(), 1);
        assert_eq!(service.file_count(), 1);
    }

    #[tokio::test]
    async fn locked_upload_keeps_unlocked_fallback() {
        let service = MemoryService::new();
        let first = service.put_remote(&note("a"), &schema()).unwrap();
        let mut metadata = service.remote_metadata(&RecordId::new("note", "a")).unwrap();
        metadata.locked = true;
        let locked = service.upload_record(&metadata).await.unwrap();
        assert!(locked.is_locked);
        assert_eq!(locked.previous_unlocked_version, Some(first.version.clone()));
        assert_eq!(locked.readable_version(), Some(&first.version));

        let unlocked = service
            .update_metadata(&locked.remote_identifier, &MetadataPatch::unlock())
            .await
            .unwrap();
        assert!(!unlocked.is_locked);
        assert!(unlocked.previous_unlocked_version.is_none());
        assert!(unlocked.version.is_newer_than(&locked.version));
        let current = service.remote_metadata(&RecordId::new("note", "a")).unwrap();
        assert!(!current.locked);
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let service = MemoryService::new();
        service.fail_next(Operation::FetchAll, ServiceError::RateLimited);
        assert_eq!(
            service.fetch_all_records().await.unwrap_err(),
            ServiceError::RateLimited
        );
        assert!(service.fetch_all_records().await.is_ok());
        assert_eq!(service.calls(Operation::FetchAll), 2);

        service.expire_auth();
        assert_eq!(
            service.fetch_all_records().await.unwrap_err(),
            ServiceError::AuthExpired
        );
        service.authenticate().await.unwrap();
        assert!(service.fetch_all_records().await.is_ok());
    }

    #[tokio::test]
    async fn failing_slot_rejects_uploads() {
        let service = MemoryService::new();
        service.fail_file_slot("attachment");
        let id = RecordId::new("note", "a");
        assert!(service
            .upload_file(&id, "attachment", Bytes::from_static(b"x"))
            .await
            .is_err());
        assert!(service
            .upload_file(&id, "cover", Bytes::from_static(b"x"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn duplicate_files_extend_the_manifest() {
        let service = MemoryService::new();
        let id = RecordId::new("note", "a");
        let first = service.put_remote(&note("a"), &schema()).unwrap();
        let confirmed = service
            .add_duplicate_file(&id, "attachment", Bytes::from_static(b"two"), true)
            .unwrap();
        let unconfirmed = service
            .add_duplicate_file(&id, "attachment", Bytes::from_static(b"three"), false)
            .unwrap();

        let current = service.remote_record(&id).unwrap();
        assert!(current.version.is_newer_than(&first.version));
        let metadata = service.remote_metadata(&id).unwrap();
        assert_eq!(metadata.files.len(), 3);

        let history = service.fetch_file_version_history(&confirmed).await.unwrap();
        assert_eq!(history[0].identifier, confirmed.version_identifier);
        let history = service
            .fetch_file_version_history(&unconfirmed)
            .await
            .unwrap();
        assert!(history
            .iter()
            .all(|version| version.identifier != unconfirmed.version_identifier));

        assert!(service.remove_file(&confirmed.remote_identifier));
        assert!(service
            .fetch_file_version_history(&confirmed)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn call_hooks_run_once_before_the_call() {
        let service = Arc::new(MemoryService::new());
        let shared = Arc::clone(&service);
        service.on_next_call(Operation::FetchAll, move || {
            shared
                .put_remote(&note("a"), &schema())
                .expect("remote write");
        });

        let all = service.fetch_all_records().await.unwrap();
        assert_eq!(all.records.len(), 1);
        assert_eq!(service.record_count(), 1);
        assert!(service.fetch_all_records().await.is_ok());
        assert_eq!(service.calls(Operation::FetchAll), 2);
    }
}
