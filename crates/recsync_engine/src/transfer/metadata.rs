//! Unlocking records that were uploaded locked.

use super::{
    missing_relationship_targets, RecordChanges, RecordFailure, TransferContext, TransferResult,
};
use crate::error::RecordError;
use recsync_model::{LockFlags, ManagedRecord, MetadataPatch, RecordStatus};
use recsync_store::Write;
use tracing::{debug, info};

/// Clears the remote lock once every relationship target is uploaded.
///
/// If a target is still missing the record is queued for another upload
/// instead: its local side is marked updated and the pending unlock is
/// dropped. When the remote has moved past the revision this device
/// uploaded, the unlock is abandoned and the newer revision is left for
/// the download stage.
pub(crate) async fn unlock(
    ctx: &TransferContext<'_>,
    mut record: ManagedRecord,
) -> TransferResult<RecordChanges> {
    let superseded = match (record.local.as_ref(), record.remote.as_ref()) {
        (Some(local), Some(remote)) => !local.is_at(&remote.version),
        _ => false,
    };
    if superseded {
        info!(record = %record.id, "remote revision moved on, skipping unlock");
        record.lock_flags = LockFlags::NONE;
        return Ok(RecordChanges::new(vec![Write::PutRecord(record)]));
    }

    let schema = ctx.registry.require(record.id.record_type())?;
    let object = ctx
        .store
        .object(&record.id)?
        .ok_or(RecordError::DoesNotExist)?;
    let remote_identifier = record
        .remote
        .as_ref()
        .map(|remote| remote.remote_identifier.clone())
        .ok_or(RecordError::DoesNotExist)?;

    let missing = missing_relationship_targets(ctx.store, schema, &object)?;
    if let Some((key, target)) = missing.into_iter().next() {
        info!(record = %record.id, target = %target, "relationship still unresolved, re-queueing upload");
        if let Some(local) = record.local.as_mut() {
            local.status = RecordStatus::Updated;
        }
        record.lock_flags.remove(LockFlags::UNLOCK_PENDING);
        return Err(RecordFailure::with_salvage(
            RecordError::UnresolvedRelationship { key, target },
            vec![Write::PutRecord(record)],
        ));
    }

    let patch = MetadataPatch::unlock();
    let mut remote = ctx
        .caller
        .call("update_metadata", || {
            ctx.caller
                .service()
                .update_metadata(&remote_identifier, &patch)
        })
        .await?;

    remote.status = RecordStatus::Normal;
    if let Some(local) = record.local.as_mut() {
        local.version_identifier = Some(remote.version.identifier.clone());
    }
    record.remote = Some(remote);
    record.lock_flags = LockFlags::NONE;
    debug!(record = %record.id, "record unlocked");
    Ok(RecordChanges::new(vec![Write::PutRecord(record)]))
}
