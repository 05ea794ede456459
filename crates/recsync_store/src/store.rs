//! The object store capability.

use crate::error::StoreResult;
use crate::event::{CommitEvent, CommitHook, CommitOrigin};
use crate::transaction::StoreTransaction;
use bytes::Bytes;
use recsync_model::{ChangeToken, ManagedRecord, RecordId, RecordPredicate, SyncObject};

/// Storage the sync engine reads from and commits into.
///
/// Implementations must:
/// - Apply a committed transaction atomically, or not at all
/// - Serialize commits (single writer)
/// - Allow reads concurrently with an open transaction
/// - Invoke every registered hook after each successful commit, outside
///   any internal lock
/// - Keep exactly one managed record per record ID
pub trait ObjectStore: Send + Sync {
    /// Managed records matching `predicate`, ordered by record ID.
    fn fetch_records(&self, predicate: &RecordPredicate) -> StoreResult<Vec<ManagedRecord>>;

    /// The managed record for `id`.
    fn record(&self, id: &RecordId) -> StoreResult<Option<ManagedRecord>>;

    /// The domain object for `id`.
    fn object(&self, id: &RecordId) -> StoreResult<Option<SyncObject>>;

    /// IDs of every domain object in the store.
    fn object_ids(&self) -> StoreResult<Vec<RecordId>>;

    /// A file kept from an earlier failed download.
    fn cached_file(&self, id: &RecordId, slot: &str) -> StoreResult<Option<Bytes>>;

    /// The persisted change token.
    fn change_token(&self) -> StoreResult<Option<ChangeToken>>;

    /// Opens a write transaction.
    fn begin(&self) -> StoreResult<StoreTransaction> {
        Ok(StoreTransaction::new())
    }

    /// Applies every buffered write atomically.
    fn commit(&self, txn: StoreTransaction, origin: CommitOrigin) -> StoreResult<CommitEvent>;

    /// Registers a hook called after each commit.
    fn on_commit(&self, hook: CommitHook);
}
