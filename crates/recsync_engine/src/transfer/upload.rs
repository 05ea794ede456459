//! Upload of one record: files first, then metadata.

use super::{
    missing_relationship_targets, outgoing_metadata, RecordChanges, RecordFailure,
    TransferContext, TransferResult,
};
use crate::error::{FileError, RecordError, ServiceError};
use recsync_model::{ContentHash, LockFlags, ManagedRecord, RecordStatus};
use recsync_store::Write;
use tracing::{debug, info, warn};

/// Uploads the local copy of `record`.
///
/// Files whose hash matches the last uploaded version are skipped. File
/// failures are collected; files that did upload are kept in the salvage
/// so a retry does not send them again. A record referencing targets that
/// are not on the remote yet is uploaded locked and flagged for the unlock
/// pass.
pub(crate) async fn upload(
    ctx: &TransferContext<'_>,
    mut record: ManagedRecord,
) -> TransferResult<RecordChanges> {
    let schema = ctx.registry.require(record.id.record_type())?;
    let object = ctx
        .store
        .object(&record.id)?
        .ok_or(RecordError::DoesNotExist)?;
    let Some(local) = record.local.as_mut() else {
        return Err(RecordError::DoesNotExist.into());
    };

    let mut failures = Vec::new();
    for slot in schema.files() {
        let Some(contents) = object.files.get(slot) else {
            continue;
        };
        let hash = ContentHash::of_bytes(contents);
        if local
            .remote_files
            .get(slot)
            .is_some_and(|file| file.matches(&hash))
        {
            debug!(record = %record.id, slot = %slot, "file unchanged, skipping upload");
            continue;
        }

        let result = ctx
            .caller
            .call("upload_file", || {
                ctx.caller
                    .service()
                    .upload_file(&record.id, slot, contents.clone())
            })
            .await;
        match result {
            Ok(file) => {
                local.remote_files.insert(slot.clone(), file);
            }
            Err(ServiceError::Cancelled) => return Err(RecordError::Cancelled.into()),
            Err(err) => {
                warn!(record = %record.id, slot = %slot, error = %err, "file upload failed");
                failures.push(FileError::from_service(slot.clone(), &err));
            }
        }
    }

    if !failures.is_empty() {
        return Err(RecordFailure::with_salvage(
            RecordError::FilesFailed(failures),
            vec![Write::PutRecord(record)],
        ));
    }

    local
        .remote_files
        .retain(|slot, _| schema.has_file(slot) && object.files.contains_key(slot));
    let manifest = local.remote_files.values().cloned().collect();

    let missing = missing_relationship_targets(ctx.store, schema, &object)?;
    let locked = !missing.is_empty();
    if locked {
        info!(
            record = %record.id,
            missing = missing.len(),
            "relationship targets not uploaded yet, uploading locked"
        );
    }

    let metadata = outgoing_metadata(&object, schema, manifest, locked);
    let content_hash = object.content_hash(schema)?;
    let uploaded = ctx
        .caller
        .call("upload_record", || {
            ctx.caller.service().upload_record(&metadata)
        })
        .await;
    let mut remote = match uploaded {
        Ok(remote) => remote,
        Err(err) => {
            let error = match err {
                ServiceError::Cancelled => RecordError::Cancelled,
                other => RecordError::Service(other),
            };
            return Err(RecordFailure::with_salvage(
                error,
                vec![Write::PutRecord(record)],
            ));
        }
    };

    local.settle(&remote.version, Some(content_hash));
    remote.status = RecordStatus::Normal;
    record.remote = Some(remote);
    if locked {
        record
            .lock_flags
            .insert(LockFlags::LOCKED | LockFlags::UNLOCK_PENDING);
    } else {
        record.lock_flags = LockFlags::NONE;
    }

    debug!(record = %record.id, locked, "record uploaded");
    let id = record.id.clone();
    Ok(RecordChanges::new(vec![
        Write::PutRecord(record),
        Write::ClearCache(id),
    ]))
}
