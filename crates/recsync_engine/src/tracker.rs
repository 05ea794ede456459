//! Local and remote change tracking.
//!
//! Local changes arrive as commit events from the object store and are
//! queued until the next seed. Remote changes are fetched with the
//! persisted change token, falling back to a full fetch when there is no
//! token or the service rejects it.

use crate::call::ServiceCaller;
use crate::error::{RecordError, ServiceError, SyncError, SyncResult};
use crate::service::RemoteEntry;
use chrono::Utc;
use parking_lot::Mutex;
use recsync_model::{
    LocalRecord, ManagedRecord, RecordId, RecordPredicate, RecordStatus, RemoteRecord,
    SchemaRegistry,
};
use recsync_store::{CommitEvent, CommitOrigin, ObjectStore, StoreResult, StoreTransaction};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a seed pass.
#[derive(Debug, Default, PartialEq)]
pub struct SeedOutcome {
    /// Records created for newly observed objects.
    pub created: usize,
    /// Records marked updated.
    pub updated: usize,
    /// Records marked deleted.
    pub deleted: usize,
    /// Objects that failed validation and are not tracked.
    pub rejected: Vec<(RecordId, RecordError)>,
}

impl SeedOutcome {
    /// Number of records touched.
    pub fn transitions(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Result of a remote fetch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Whether every remote record was fetched.
    pub full: bool,
    /// Remote records created or changed.
    pub updated: usize,
    /// Remote records marked deleted.
    pub deleted: usize,
}

/// Observes local commits and applies remote changes to the record table.
///
/// Only commits made by the host (`CommitOrigin::Local`) are queued; the
/// engine's own writes never mark records dirty.
pub struct ChangeTracker {
    queue: Arc<Mutex<Vec<CommitEvent>>>,
}

impl ChangeTracker {
    /// Registers a commit hook on `store` and returns the tracker fed by it.
    pub fn attach(store: &dyn ObjectStore) -> Self {
        let queue: Arc<Mutex<Vec<CommitEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&queue);
        store.on_commit(Arc::new(move |event: &CommitEvent| {
            if event.origin == CommitOrigin::Local {
                sink.lock().push(event.clone());
            }
        }));
        Self { queue }
    }

    /// Number of queued commit events.
    pub fn pending_events(&self) -> usize {
        self.queue.lock().len()
    }

    fn take_events(&self) -> Vec<CommitEvent> {
        std::mem::take(&mut *self.queue.lock())
    }

    fn requeue(&self, mut events: Vec<CommitEvent>) {
        let mut queue = self.queue.lock();
        events.append(&mut queue);
        *queue = events;
    }

    /// Turns queued local commits into record transitions.
    ///
    /// Objects touching syncable keys get their record marked updated,
    /// created if missing. Deleted objects get their record marked
    /// deleted. Store objects with no record at all are picked up too.
    /// Objects of unregistered types, or with an empty identifier, are
    /// ignored; objects failing validation are rejected and stay
    /// untracked. If the commit fails the events are queued again.
    pub fn seed(
        &self,
        store: &dyn ObjectStore,
        registry: &SchemaRegistry,
    ) -> SyncResult<SeedOutcome> {
        let events = self.take_events();
        match seed_events(store, registry, &events) {
            Ok(outcome) => {
                if outcome.transitions() > 0 || !outcome.rejected.is_empty() {
                    info!(
                        created = outcome.created,
                        updated = outcome.updated,
                        deleted = outcome.deleted,
                        rejected = outcome.rejected.len(),
                        "seeded local changes"
                    );
                }
                Ok(outcome)
            }
            Err(err) => {
                self.requeue(events);
                Err(SyncError::Database(err))
            }
        }
    }
}

fn seed_events(
    store: &dyn ObjectStore,
    registry: &SchemaRegistry,
    events: &[CommitEvent],
) -> StoreResult<SeedOutcome> {
    let now = Utc::now();
    let mut outcome = SeedOutcome::default();
    let mut touched: BTreeMap<RecordId, ManagedRecord> = BTreeMap::new();
    let mut created: BTreeSet<RecordId> = BTreeSet::new();

    for event in events {
        for id in event.inserted.iter().chain(&event.updated) {
            let Some(schema) = registry.get(id.record_type()) else {
                debug!(record = %id, "type not registered, ignoring change");
                continue;
            };
            let existing = match touched.get(id) {
                Some(record) => Some(record.clone()),
                None => store.record(id)?,
            };
            match existing {
                Some(mut record) => {
                    let revived = record.local_status() == Some(RecordStatus::Deleted);
                    if !revived && !schema.touches_syncable(&event.changed(id)) {
                        debug!(record = %id, "only incidental fields changed");
                        continue;
                    }
                    match record.local.as_mut() {
                        Some(local) => local.mark_updated(now),
                        None => record.local = Some(LocalRecord::new(RecordStatus::Updated, now)),
                    }
                    touched.insert(id.clone(), record);
                }
                None => {
                    let Some(object) = store.object(id)? else {
                        continue;
                    };
                    if !id.is_valid() {
                        debug!(record = %id, "empty identifier, ignoring object");
                        continue;
                    }
                    if let Err(err) = schema.validate(&object) {
                        warn!(record = %id, error = %err, "object rejected");
                        outcome.rejected.push((id.clone(), RecordError::Model(err)));
                        continue;
                    }
                    let mut record = ManagedRecord::new(id.clone())
                        .with_local(LocalRecord::new(RecordStatus::Updated, now));
                    record.is_syncing_enabled = schema.syncing_enabled();
                    created.insert(id.clone());
                    touched.insert(id.clone(), record);
                }
            }
        }

        for id in &event.deleted {
            let existing = match touched.get(id) {
                Some(record) => Some(record.clone()),
                None => store.record(id)?,
            };
            let Some(mut record) = existing else {
                continue;
            };
            if created.remove(id) {
                // Created and deleted before any sync: nothing to propagate.
                touched.remove(id);
                continue;
            }
            if let Some(local) = record.local.as_mut() {
                local.mark_deleted(now);
                touched.insert(id.clone(), record);
            }
        }
    }

    for id in store.object_ids()? {
        if touched.contains_key(&id)
            || outcome.rejected.iter().any(|(rejected, _)| *rejected == id)
            || store.record(&id)?.is_some()
        {
            continue;
        }
        let Some(schema) = registry.get(id.record_type()) else {
            continue;
        };
        if !id.is_valid() {
            continue;
        }
        let Some(object) = store.object(&id)? else {
            continue;
        };
        if let Err(err) = schema.validate(&object) {
            outcome.rejected.push((id.clone(), RecordError::Model(err)));
            continue;
        }
        let mut record =
            ManagedRecord::new(id.clone()).with_local(LocalRecord::new(RecordStatus::Updated, now));
        record.is_syncing_enabled = schema.syncing_enabled();
        created.insert(id.clone());
        touched.insert(id, record);
    }

    let mut txn = store.begin()?;
    for (id, record) in touched {
        match record.local_status() {
            Some(RecordStatus::Deleted) => outcome.deleted += 1,
            _ if created.contains(&id) => outcome.created += 1,
            _ => outcome.updated += 1,
        }
        txn.put_record(record);
    }
    if !txn.is_empty() {
        store.commit(txn, CommitOrigin::Sync)?;
    }
    Ok(outcome)
}

/// Applies remote changes to the record table and stores the new token.
///
/// Without a token, or when the token is rejected, every remote record is
/// fetched and records missing from the listing are marked remotely
/// deleted. An incremental listing that reports a record both updated and
/// deleted keeps the update.
pub(crate) async fn fetch_remote(
    store: &dyn ObjectStore,
    registry: &SchemaRegistry,
    caller: &ServiceCaller,
) -> SyncResult<FetchOutcome> {
    let token = store.change_token()?;

    let incremental = match &token {
        Some(token) => {
            let result = caller
                .call("fetch_changed_records", || {
                    caller.service().fetch_changed_records(token)
                })
                .await;
            match result {
                Ok(changes) => Some(changes),
                Err(ServiceError::InvalidToken) => {
                    warn!("change token rejected, falling back to full fetch");
                    None
                }
                Err(err) => return Err(SyncError::from_fetch(err)),
            }
        }
        None => None,
    };

    let mut txn = store.begin()?;
    let outcome = match incremental {
        Some(changes) => {
            let mut outcome = FetchOutcome::default();
            let applied = apply_updates(store, registry, &mut txn, changes.updated)?;
            outcome.updated = applied.len();
            let updated_remote_ids: BTreeSet<String> =
                applied.values().map(|remote_id| remote_id.to_string()).collect();

            let deleted: BTreeSet<String> = changes.deleted.into_iter().collect();
            if !deleted.is_empty() {
                for mut record in store.fetch_records(&RecordPredicate::all())? {
                    let Some(remote) = record.remote.as_mut() else {
                        continue;
                    };
                    if !deleted.contains(&remote.remote_identifier)
                        || updated_remote_ids.contains(&remote.remote_identifier)
                        || applied.contains_key(&record.id)
                    {
                        continue;
                    }
                    remote.status = RecordStatus::Deleted;
                    outcome.deleted += 1;
                    txn.put_record(record);
                }
            }
            txn.set_token(Some(changes.token));
            outcome
        }
        None => {
            let all = caller
                .call("fetch_all_records", || caller.service().fetch_all_records())
                .await
                .map_err(SyncError::from_fetch)?;
            let mut outcome = FetchOutcome {
                full: true,
                ..FetchOutcome::default()
            };
            let listed: BTreeSet<RecordId> =
                all.records.iter().map(|entry| entry.id.clone()).collect();
            let applied = apply_updates(store, registry, &mut txn, all.records)?;
            outcome.updated = applied.len();

            for mut record in store.fetch_records(&RecordPredicate::all())? {
                if listed.contains(&record.id) {
                    continue;
                }
                let Some(remote) = record.remote.as_mut() else {
                    continue;
                };
                if remote.status == RecordStatus::Deleted {
                    continue;
                }
                remote.status = RecordStatus::Deleted;
                outcome.deleted += 1;
                txn.put_record(record);
            }
            txn.set_token(Some(all.token));
            outcome
        }
    };

    store.commit(txn, CommitOrigin::Sync)?;
    info!(
        full = outcome.full,
        updated = outcome.updated,
        deleted = outcome.deleted,
        "fetched remote changes"
    );
    Ok(outcome)
}

/// Writes remote entries into `txn`; returns the applied record IDs with
/// their remote identifiers.
fn apply_updates(
    store: &dyn ObjectStore,
    registry: &SchemaRegistry,
    txn: &mut StoreTransaction,
    entries: Vec<RemoteEntry>,
) -> StoreResult<BTreeMap<RecordId, String>> {
    let mut applied = BTreeMap::new();
    for RemoteEntry { id, record: remote } in entries {
        let Some(schema) = registry.get(id.record_type()) else {
            debug!(record = %id, "remote type not registered, ignoring");
            continue;
        };
        let mut record = match store.record(&id)? {
            Some(record) => record,
            None => {
                let mut record = ManagedRecord::new(id.clone());
                record.is_syncing_enabled = schema.syncing_enabled();
                record
            }
        };
        let remote_identifier = remote.remote_identifier.clone();
        apply_remote(&mut record, remote);
        applied.insert(id, remote_identifier);
        txn.put_record(record);
    }
    Ok(applied)
}

/// Replaces the remote side; the status is normal only if the local side
/// already agrees with the remote version.
fn apply_remote(record: &mut ManagedRecord, mut remote: RemoteRecord) {
    let in_sync = record
        .local
        .as_ref()
        .is_some_and(|local| local.is_at(&remote.version));
    remote.status = if in_sync {
        RecordStatus::Normal
    } else {
        RecordStatus::Updated
    };
    if let Some(previous) = &record.remote {
        if previous.remote_identifier != remote.remote_identifier {
            debug!(
                record = %record.id,
                old = %previous.remote_identifier,
                new = %remote.remote_identifier,
                "remote identity replaced"
            );
        }
    }
    record.remote = Some(remote);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use recsync_model::{SyncObject, TypeSchema, Version};
    use recsync_store::MemoryStore;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .with(TypeSchema::new("note", "id").with_fields(["title"]))
            .with(
                TypeSchema::new("draft", "id")
                    .with_fields(["title"])
                    .with_syncing_enabled(false),
            )
    }

    fn note(id: &str, title: &str) -> SyncObject {
        SyncObject::new(RecordId::new("note", id))
            .with_field("id", id)
            .with_field("title", title)
    }

    #[test]
    fn seeds_new_objects_as_updated() {
        let store = MemoryStore::new();
        let tracker = ChangeTracker::attach(&store);
        store.put_object(note("n1", "a")).unwrap();
        assert_eq!(tracker.pending_events(), 1);

        let outcome = tracker.seed(&store, &registry()).unwrap();
        assert_eq!(outcome.created, 1);
        assert_eq!(tracker.pending_events(), 0);

        let record = store.record(&RecordId::new("note", "n1")).unwrap().unwrap();
        assert_eq!(record.local_status(), Some(RecordStatus::Updated));
        assert!(record.remote.is_none());
    }

    #[test]
    fn incidental_changes_are_ignored() {
        let store = MemoryStore::new();
        let tracker = ChangeTracker::attach(&store);
        store.put_object(note("n1", "a")).unwrap();
        tracker.seed(&store, &registry()).unwrap();

        let id = RecordId::new("note", "n1");
        let mut record = store.record(&id).unwrap().unwrap();
        record
            .local
            .as_mut()
            .unwrap()
            .settle(&Version::new("v1", Utc::now()), None);
        let mut txn = store.begin().unwrap();
        txn.put_record(record);
        store.commit(txn, CommitOrigin::Sync).unwrap();

        store
            .put_object(note("n1", "a").with_field("viewed", 4i64))
            .unwrap();
        let outcome = tracker.seed(&store, &registry()).unwrap();
        assert_eq!(outcome.transitions(), 0);
        let record = store.record(&id).unwrap().unwrap();
        assert_eq!(record.local_status(), Some(RecordStatus::Normal));

        store.put_object(note("n1", "b")).unwrap();
        let outcome = tracker.seed(&store, &registry()).unwrap();
        assert_eq!(outcome.updated, 1);
    }

    #[test]
    fn deletion_marks_record_deleted() {
        let store = MemoryStore::new();
        let tracker = ChangeTracker::attach(&store);
        store.put_object(note("n1", "a")).unwrap();
        tracker.seed(&store, &registry()).unwrap();

        store.delete_object(&RecordId::new("note", "n1")).unwrap();
        let outcome = tracker.seed(&store, &registry()).unwrap();
        assert_eq!(outcome.deleted, 1);
        let record = store.record(&RecordId::new("note", "n1")).unwrap().unwrap();
        assert_eq!(record.local_status(), Some(RecordStatus::Deleted));
    }

    #[test]
    fn created_then_deleted_leaves_nothing() {
        let store = MemoryStore::new();
        let tracker = ChangeTracker::attach(&store);
        store.put_object(note("n1", "a")).unwrap();
        store.delete_object(&RecordId::new("note", "n1")).unwrap();
        let outcome = tracker.seed(&store, &registry()).unwrap();
        assert_eq!(outcome.transitions(), 0);
        assert!(store.record(&RecordId::new("note", "n1")).unwrap().is_none());
    }

    #[test]
    fn invalid_and_unregistered_objects_are_not_tracked() {
        let store = MemoryStore::new();
        let tracker = ChangeTracker::attach(&store);
        store
            .put_object(
                SyncObject::new(RecordId::new("note", "n1"))
                    .with_field("id", "other")
                    .with_field("title", "x"),
            )
            .unwrap();
        store
            .put_object(SyncObject::new(RecordId::new("photo", "p1")))
            .unwrap();
        store
            .put_object(SyncObject::new(RecordId::new("note", "")))
            .unwrap();

        let outcome = tracker.seed(&store, &registry()).unwrap();
        assert_eq!(outcome.transitions(), 0);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].0, RecordId::new("note", "n1"));
        assert!(store
            .fetch_records(&RecordPredicate::all())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn untracked_objects_are_swept_up() {
        let store = MemoryStore::new();
        store.put_object(note("n1", "a")).unwrap();
        let tracker = ChangeTracker::attach(&store);
        assert_eq!(tracker.pending_events(), 0);

        let outcome = tracker.seed(&store, &registry()).unwrap();
        assert_eq!(outcome.created, 1);
    }

    #[test]
    fn syncing_default_comes_from_schema() {
        let store = MemoryStore::new();
        let tracker = ChangeTracker::attach(&store);
        store
            .put_object(
                SyncObject::new(RecordId::new("draft", "d1"))
                    .with_field("id", "d1")
                    .with_field("title", "x"),
            )
            .unwrap();
        tracker.seed(&store, &registry()).unwrap();
        let record = store.record(&RecordId::new("draft", "d1")).unwrap().unwrap();
        assert!(!record.is_syncing_enabled);
    }

    #[test]
    fn engine_writes_are_not_queued() {
        let store = MemoryStore::new();
        let tracker = ChangeTracker::attach(&store);
        let mut txn = store.begin().unwrap();
        txn.put_object(note("n1", "a"));
        store.commit(txn, CommitOrigin::Sync).unwrap();
        assert_eq!(tracker.pending_events(), 0);
    }

    #[test]
    fn failed_seed_requeues_events() {
        let store = MemoryStore::new();
        let tracker = ChangeTracker::attach(&store);
        store.put_object(note("n1", "a")).unwrap();
        store.set_corrupted(true);
        assert!(tracker.seed(&store, &registry()).unwrap_err().is_fatal());
        assert_eq!(tracker.pending_events(), 1);

        store.set_corrupted(false);
        assert_eq!(tracker.seed(&store, &registry()).unwrap().created, 1);
    }
}
