//! Commit notifications.

use recsync_model::RecordId;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Who produced a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitOrigin {
    /// The host application.
    Local,
    /// The sync engine applying transfer results.
    Sync,
}

/// Objects touched by one committed transaction.
///
/// Emitted only after the commit is durable. Bookkeeping writes (records,
/// token, file cache) do not appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEvent {
    /// Commit sequence number.
    pub sequence: u64,
    /// Producer of the commit.
    pub origin: CommitOrigin,
    /// Objects that did not exist before.
    pub inserted: Vec<RecordId>,
    /// Objects that existed and changed.
    pub updated: Vec<RecordId>,
    /// Objects removed.
    pub deleted: Vec<RecordId>,
    /// Changed keys for inserted and updated objects.
    pub changed_fields: BTreeMap<RecordId, BTreeSet<String>>,
}

impl CommitEvent {
    /// Creates an empty event.
    pub fn new(sequence: u64, origin: CommitOrigin) -> Self {
        Self {
            sequence,
            origin,
            inserted: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            changed_fields: BTreeMap::new(),
        }
    }

    /// Returns true if no object was touched.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Changed keys of one object, empty if untouched.
    pub fn changed(&self, id: &RecordId) -> BTreeSet<String> {
        self.changed_fields.get(id).cloned().unwrap_or_default()
    }
}

/// Callback invoked after every commit.
pub type CommitHook = Arc<dyn Fn(&CommitEvent) + Send + Sync>;
