//! Remote deletion of locally deleted records.

use super::{RecordChanges, RecordFailure, TransferContext, TransferResult};
use crate::error::{FileError, RecordError, ServiceError};
use recsync_model::{ManagedRecord, RecordStatus};
use recsync_store::Write;
use tracing::{debug, warn};

/// Deletes whichever side still exists, then drops the pairing.
///
/// A live remote copy (only possible when the local side was deleted) loses
/// its files and then its record; files and records already gone remotely
/// count as deleted. Every file is attempted even after one fails. If any
/// fail, the remote record is kept and the record remembers only the files
/// still to delete. The local object, if any, is removed in the same
/// transaction as the pairing.
pub(crate) async fn delete(
    ctx: &TransferContext<'_>,
    mut record: ManagedRecord,
) -> TransferResult<RecordChanges> {
    let local_files = record
        .local
        .as_ref()
        .map(|local| local.remote_files.values().cloned().collect::<Vec<_>>())
        .unwrap_or_default();

    if let Some(remote) = record
        .remote
        .clone()
        .filter(|remote| remote.status != RecordStatus::Deleted)
    {
        let mut deleted = Vec::with_capacity(local_files.len());
        let mut failures = Vec::new();
        for file in &local_files {
            let result = ctx
                .caller
                .call("delete_file", || ctx.caller.service().delete_file(file))
                .await;
            match ignore_missing(result) {
                Ok(()) => deleted.push(file.identifier.clone()),
                Err(ServiceError::Cancelled) => return Err(RecordError::Cancelled.into()),
                Err(err) => {
                    warn!(
                        record = %record.id,
                        slot = %file.identifier,
                        error = %err,
                        "file delete failed"
                    );
                    failures.push(FileError::from_service(file.identifier.clone(), &err));
                }
            }
        }

        if !failures.is_empty() {
            if let Some(local) = record.local.as_mut() {
                local
                    .remote_files
                    .retain(|slot, _| !deleted.contains(slot));
            }
            return Err(RecordFailure::with_salvage(
                RecordError::FilesFailed(failures),
                vec![Write::PutRecord(record)],
            ));
        }

        let result = ctx
            .caller
            .call("delete_record", || {
                ctx.caller
                    .service()
                    .delete_record(&remote.remote_identifier)
            })
            .await;
        ignore_missing(result)?;
        debug!(record = %record.id, files = local_files.len(), "remote copy deleted");
    }

    let mut writes = Vec::with_capacity(3);
    if ctx.store.object(&record.id)?.is_some() {
        writes.push(Write::DeleteObject(record.id.clone()));
    }
    writes.push(Write::RemoveRecord(record.id.clone()));
    writes.push(Write::ClearCache(record.id));
    Ok(RecordChanges::new(writes))
}

fn ignore_missing(result: Result<(), ServiceError>) -> Result<(), ServiceError> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}
