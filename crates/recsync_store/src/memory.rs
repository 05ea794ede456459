//! In-memory object store.

use crate::error::{StoreError, StoreResult};
use crate::event::{CommitEvent, CommitHook, CommitOrigin};
use crate::state_file::StateFile;
use crate::store::ObjectStore;
use crate::transaction::{StoreTransaction, Write};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use recsync_model::{ChangeToken, ManagedRecord, RecordId, RecordPredicate, SyncObject};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct StoreState {
    objects: BTreeMap<RecordId, SyncObject>,
    records: BTreeMap<RecordId, ManagedRecord>,
    token: Option<ChangeToken>,
    file_cache: BTreeMap<(RecordId, String), Bytes>,
    sequence: u64,
}

/// An in-memory `ObjectStore`.
///
/// Reads take a shared lock; commits are serialized through a dedicated
/// writer lock and applied under an exclusive lock, so readers never see a
/// partially applied transaction.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    write_lock: Mutex<()>,
    hooks: RwLock<Vec<CommitHook>>,
    corrupted: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            write_lock: Mutex::new(()),
            hooks: RwLock::new(Vec::new()),
            corrupted: AtomicBool::new(false),
        }
    }

    /// Inserts or replaces an object as the host application.
    pub fn put_object(&self, object: SyncObject) -> StoreResult<CommitEvent> {
        let mut txn = self.begin()?;
        txn.put_object(object);
        self.commit(txn, CommitOrigin::Local)
    }

    /// Deletes an object as the host application.
    pub fn delete_object(&self, id: &RecordId) -> StoreResult<CommitEvent> {
        let mut txn = self.begin()?;
        txn.delete_object(id.clone());
        self.commit(txn, CommitOrigin::Local)
    }

    /// Makes every read and commit fail with a corruption error.
    pub fn set_corrupted(&self, corrupted: bool) {
        self.corrupted.store(corrupted, Ordering::SeqCst);
    }

    /// Number of commits applied so far.
    pub fn sequence(&self) -> u64 {
        self.state.read().sequence
    }

    /// Number of cached files.
    pub fn cached_file_count(&self) -> usize {
        self.state.read().file_cache.len()
    }

    /// Writes records and the change token to `path`.
    pub fn save_state(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let snapshot = {
            let state = self.state.read();
            StateFile::new(
                state.token.clone(),
                state.records.values().cloned().collect(),
            )
        };
        snapshot.write(path)
    }

    /// Replaces records and the change token with the contents of `path`.
    ///
    /// Returns false if the file does not exist.
    pub fn load_state(&self, path: impl AsRef<Path>) -> StoreResult<bool> {
        let Some(snapshot) = StateFile::read(path)? else {
            return Ok(false);
        };
        let _writer = self.write_lock.lock();
        let mut state = self.state.write();
        state.token = snapshot.token;
        state.records = snapshot
            .records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        tracing::debug!(records = state.records.len(), "loaded sync state");
        Ok(true)
    }

    fn check(&self) -> StoreResult<()> {
        if self.corrupted.load(Ordering::SeqCst) {
            Err(StoreError::corrupted("store marked corrupted"))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryStore {
    fn fetch_records(&self, predicate: &RecordPredicate) -> StoreResult<Vec<ManagedRecord>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .records
            .values()
            .filter(|record| predicate.matches(record))
            .cloned()
            .collect())
    }

    fn record(&self, id: &RecordId) -> StoreResult<Option<ManagedRecord>> {
        self.check()?;
        Ok(self.state.read().records.get(id).cloned())
    }

    fn object(&self, id: &RecordId) -> StoreResult<Option<SyncObject>> {
        self.check()?;
        Ok(self.state.read().objects.get(id).cloned())
    }

    fn object_ids(&self) -> StoreResult<Vec<RecordId>> {
        self.check()?;
        Ok(self.state.read().objects.keys().cloned().collect())
    }

    fn cached_file(&self, id: &RecordId, slot: &str) -> StoreResult<Option<Bytes>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .file_cache
            .get(&(id.clone(), slot.to_string()))
            .cloned())
    }

    fn change_token(&self) -> StoreResult<Option<ChangeToken>> {
        self.check()?;
        Ok(self.state.read().token.clone())
    }

    fn commit(&self, txn: StoreTransaction, origin: CommitOrigin) -> StoreResult<CommitEvent> {
        self.check()?;
        let writes = txn.into_writes();

        let event = {
            let _writer = self.write_lock.lock();
            let mut state = self.state.write();
            state.sequence += 1;
            let mut event = CommitEvent::new(state.sequence, origin);

            // Object state before the transaction, for every object it touches.
            let mut before: BTreeMap<RecordId, Option<SyncObject>> = BTreeMap::new();
            for write in &writes {
                match write {
                    Write::PutObject(object) => {
                        before
                            .entry(object.id.clone())
                            .or_insert_with(|| state.objects.get(&object.id).cloned());
                    }
                    Write::DeleteObject(id) => {
                        before
                            .entry(id.clone())
                            .or_insert_with(|| state.objects.get(id).cloned());
                    }
                    _ => {}
                }
            }

            for write in writes {
                apply(&mut state, write);
            }

            for (id, previous) in before {
                match (previous, state.objects.get(&id)) {
                    (None, Some(current)) => {
                        event.changed_fields.insert(id.clone(), current.all_keys());
                        event.inserted.push(id);
                    }
                    (Some(previous), Some(current)) => {
                        let changed = current.changed_keys(&previous);
                        if !changed.is_empty() {
                            event.changed_fields.insert(id.clone(), changed);
                            event.updated.push(id);
                        }
                    }
                    (Some(_), None) => event.deleted.push(id),
                    (None, None) => {}
                }
            }
            event
        };

        if !event.is_empty() {
            let hooks: Vec<CommitHook> = self.hooks.read().clone();
            for hook in hooks {
                hook(&event);
            }
        }
        Ok(event)
    }

    fn on_commit(&self, hook: CommitHook) {
        self.hooks.write().push(hook);
    }
}

fn apply(state: &mut StoreState, write: Write) {
    match write {
        Write::PutObject(object) => {
            state.objects.insert(object.id.clone(), object);
        }
        Write::DeleteObject(id) => {
            state.objects.remove(&id);
        }
        Write::PutRecord(record) => {
            state.records.insert(record.id.clone(), record);
        }
        Write::RemoveRecord(id) => {
            state.records.remove(&id);
        }
        Write::SetToken(token) => state.token = token,
        Write::CacheFile { id, slot, contents } => {
            state.file_cache.insert((id, slot), contents);
        }
        Write::ClearCache(id) => state.file_cache.retain(|(owner, _), _| owner != &id),
    }
}
