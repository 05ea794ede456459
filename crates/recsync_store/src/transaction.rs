//! Buffered write transactions.

use bytes::Bytes;
use recsync_model::{ChangeToken, ManagedRecord, RecordId, SyncObject};

/// One buffered mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    /// Insert or replace a domain object.
    PutObject(SyncObject),
    /// Remove a domain object.
    DeleteObject(RecordId),
    /// Insert or replace a managed record.
    PutRecord(ManagedRecord),
    /// Remove a managed record.
    RemoveRecord(RecordId),
    /// Replace the persisted change token.
    SetToken(Option<ChangeToken>),
    /// Keep a downloaded file for a later retry.
    CacheFile {
        /// Owning record.
        id: RecordId,
        /// File slot.
        slot: String,
        /// File contents.
        contents: Bytes,
    },
    /// Drop all cached files of a record.
    ClearCache(RecordId),
}

/// A scoped write context.
///
/// Writes are buffered in order and applied atomically by
/// `ObjectStore::commit`. Dropping an uncommitted transaction discards
/// every buffered write.
#[derive(Debug, Default)]
pub struct StoreTransaction {
    writes: Vec<Write>,
}

impl StoreTransaction {
    /// Creates an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a write.
    pub fn push(&mut self, write: Write) {
        self.writes.push(write);
    }

    /// Buffers several writes in order.
    pub fn extend(&mut self, writes: impl IntoIterator<Item = Write>) {
        self.writes.extend(writes);
    }

    /// Buffers an object insert or replace.
    pub fn put_object(&mut self, object: SyncObject) {
        self.push(Write::PutObject(object));
    }

    /// Buffers an object removal.
    pub fn delete_object(&mut self, id: RecordId) {
        self.push(Write::DeleteObject(id));
    }

    /// Buffers a record insert or replace.
    pub fn put_record(&mut self, record: ManagedRecord) {
        self.push(Write::PutRecord(record));
    }

    /// Buffers a record removal.
    pub fn remove_record(&mut self, id: RecordId) {
        self.push(Write::RemoveRecord(id));
    }

    /// Buffers a change token update.
    pub fn set_token(&mut self, token: Option<ChangeToken>) {
        self.push(Write::SetToken(token));
    }

    /// Returns the buffered writes.
    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    /// Returns the number of buffered writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Discards every buffered write.
    pub fn rollback(mut self) {
        self.discard();
    }

    /// Takes the buffered writes for applying.
    pub fn into_writes(mut self) -> Vec<Write> {
        std::mem::take(&mut self.writes)
    }

    fn discard(&mut self) {
        if !self.writes.is_empty() {
            tracing::debug!(writes = self.writes.len(), "rolling back transaction");
            self.writes.clear();
        }
    }
}

impl Drop for StoreTransaction {
    fn drop(&mut self) {
        self.discard();
    }
}
