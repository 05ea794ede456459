//! Conflict detection and verification.

use crate::transfer::{RecordChanges, TransferContext, TransferResult};
use recsync_model::{ConflictDecision, ManagedRecord, RecordStatus, SchemaRegistry};
use recsync_store::{ObjectStore, StoreResult, Write};
use tracing::debug;

/// Decides a record whose statuses conflict and applies the decision.
///
/// Uses the conflict policy of the record's type, comparing the local
/// modification date with the remote version date. A record whose type is
/// unknown, whose local side is deleted or whose object is missing is
/// flagged.
pub(crate) fn detect(
    store: &dyn ObjectStore,
    registry: &SchemaRegistry,
    mut record: ManagedRecord,
) -> StoreResult<(ConflictDecision, Write)> {
    let decision = match (registry.get(record.id.record_type()), &record.local, &record.remote) {
        (Some(schema), Some(local), Some(remote))
            if local.status != RecordStatus::Deleted
                && remote.status != RecordStatus::Deleted
                && store.object(&record.id)?.is_some() =>
        {
            schema
                .conflict_policy()
                .decide(local.modification_date, remote.version.date)
        }
        _ => ConflictDecision::Flag,
    };
    debug!(record = %record.id, decision = %decision, "conflict decided");
    record.apply_decision(decision);
    Ok((decision, Write::PutRecord(record)))
}

/// Re-checks a conflicted record against the remote metadata.
///
/// Downloads only the metadata of the readable remote version and
/// compares its content hash with the local object's. On a match the
/// conflict is cleared and both sides are settled at the remote version;
/// files are left untouched. Returns whether the conflict was cleared.
pub(crate) async fn verify(
    ctx: &TransferContext<'_>,
    mut record: ManagedRecord,
) -> TransferResult<(bool, RecordChanges)> {
    let Some(schema) = ctx.registry.get(record.id.record_type()) else {
        return Ok((false, RecordChanges::none()));
    };
    let Some(object) = ctx.store.object(&record.id)? else {
        return Ok((false, RecordChanges::none()));
    };
    let Some(remote) = record
        .remote
        .clone()
        .filter(|remote| remote.status != RecordStatus::Deleted)
    else {
        return Ok((false, RecordChanges::none()));
    };
    let Some(version) = remote.readable_version().cloned() else {
        return Ok((false, RecordChanges::none()));
    };
    if record.local_status().is_none() || record.local_status() == Some(RecordStatus::Deleted) {
        return Ok((false, RecordChanges::none()));
    }

    let metadata = ctx
        .caller
        .call("download_record", || {
            ctx.caller
                .service()
                .download_record(&remote.remote_identifier, &version)
        })
        .await?;

    let remote_hash = metadata.content_hash(schema)?;
    let local_hash = object.content_hash(schema)?;
    if remote_hash != local_hash {
        debug!(record = %record.id, "conflict confirmed");
        return Ok((false, RecordChanges::none()));
    }

    record.is_conflicted = false;
    if let Some(local) = record.local.as_mut() {
        local.settle(&remote.version, Some(local_hash));
        local.remote_files = metadata
            .files
            .into_iter()
            .filter(|file| schema.has_file(&file.identifier))
            .map(|file| (file.identifier.clone(), file))
            .collect();
    }
    if let Some(remote) = record.remote.as_mut() {
        remote.status = RecordStatus::Normal;
    }
    debug!(record = %record.id, "conflict cleared, contents match");
    Ok((true, RecordChanges::new(vec![Write::PutRecord(record)])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use recsync_model::{
        ConflictPolicy, LocalRecord, RecordId, RemoteRecord, SyncObject, TypeSchema, Version,
    };
    use recsync_store::MemoryStore;

    fn registry(policy: ConflictPolicy) -> SchemaRegistry {
        SchemaRegistry::new().with(
            TypeSchema::new("note", "id")
                .with_fields(["title"])
                .with_conflict_policy(policy),
        )
    }

    fn conflicting(local_offset: i64) -> (MemoryStore, ManagedRecord) {
        let id = RecordId::new("note", "n1");
        let store = MemoryStore::new();
        store
            .put_object(SyncObject::new(id.clone()).with_field("id", "n1"))
            .unwrap();
        let now = Utc::now();
        let record = ManagedRecord::new(id)
            .with_local(LocalRecord::new(
                RecordStatus::Updated,
                now + Duration::seconds(local_offset),
            ))
            .with_remote(RemoteRecord::new(
                "r1",
                RecordStatus::Updated,
                Version::new("v1", now),
            ));
        (store, record)
    }

    fn decided(write: Write) -> ManagedRecord {
        match write {
            Write::PutRecord(record) => record,
            other => panic!("unexpected write {other:?}"),
        }
    }

    #[test]
    fn newest_policy_prefers_newer_local_change() {
        let (store, record) = conflicting(10);
        let (decision, write) = detect(&store, &registry(ConflictPolicy::Newest), record).unwrap();
        assert_eq!(decision, ConflictDecision::Upload);
        let record = decided(write);
        assert_eq!(record.remote_status(), Some(RecordStatus::Normal));
        assert!(!record.is_conflicted);
    }

    #[test]
    fn oldest_policy_prefers_remote_when_local_is_newer() {
        let (store, record) = conflicting(10);
        let (decision, write) = detect(&store, &registry(ConflictPolicy::Oldest), record).unwrap();
        assert_eq!(decision, ConflictDecision::Download);
        assert_eq!(decided(write).local_status(), Some(RecordStatus::Normal));
    }

    #[test]
    fn default_policy_flags() {
        let (store, record) = conflicting(10);
        let (decision, write) =
            detect(&store, &registry(ConflictPolicy::Conflict), record).unwrap();
        assert_eq!(decision, ConflictDecision::Flag);
        assert!(decided(write).is_conflicted);
    }

    #[test]
    fn missing_object_or_deleted_side_flags() {
        let (_, record) = conflicting(10);
        let empty = MemoryStore::new();
        let (decision, _) = detect(&empty, &registry(ConflictPolicy::Local), record).unwrap();
        assert_eq!(decision, ConflictDecision::Flag);

        let (store, mut record) = conflicting(10);
        record.local.as_mut().unwrap().status = RecordStatus::Deleted;
        let (decision, _) = detect(&store, &registry(ConflictPolicy::Local), record).unwrap();
        assert_eq!(decision, ConflictDecision::Flag);
    }

    #[test]
    fn unknown_type_flags() {
        let (store, record) = conflicting(10);
        let (decision, _) = detect(&store, &SchemaRegistry::new(), record).unwrap();
        assert_eq!(decision, ConflictDecision::Flag);
    }
}
