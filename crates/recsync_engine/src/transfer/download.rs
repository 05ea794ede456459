//! Download of remote records in two phases.
//!
//! The first phase fetches metadata and files for each record
//! concurrently. The second resolves relationships across the whole batch,
//! preferring records downloaded in the same stage over persisted ones,
//! and only then produces writes.

use super::{RecordChanges, RecordFailure, TransferContext, TransferResult};
use crate::error::{FileError, FileErrorKind, RecordError, ServiceError};
use bytes::Bytes;
use recsync_model::{
    partition_duplicates, select_newest_confirmed, ContentHash, LocalRecord, ManagedRecord,
    RecordId, RecordMetadata, RecordStatus, RemoteFile, SchemaRegistry, SyncObject, TypeSchema,
    Version,
};
use recsync_store::{ObjectStore, StoreResult, Write};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// A record whose metadata and files are fetched but whose relationships
/// are not resolved yet.
#[derive(Debug)]
pub(crate) struct PendingDownload {
    pub record: ManagedRecord,
    pub object: SyncObject,
    /// Files fetched from the remote in this run.
    pub cached: Vec<Write>,
}

impl PendingDownload {
    pub fn id(&self) -> &RecordId {
        &self.record.id
    }
}

/// Fetches the readable remote revision of `record` and its files.
///
/// Locked records fall back to their previous unlocked version. Files whose
/// hash matches the local object or the file cache are not downloaded.
pub(crate) async fn download(
    ctx: &TransferContext<'_>,
    mut record: ManagedRecord,
) -> TransferResult<PendingDownload> {
    let schema = ctx.registry.require(record.id.record_type())?;
    let remote = record.remote.clone().ok_or(RecordError::DoesNotExist)?;
    let version = remote
        .readable_version()
        .cloned()
        .ok_or(RecordError::Locked)?;
    if remote.is_locked {
        debug!(record = %record.id, version = %version, "remote is locked, reading previous version");
    }

    let metadata = ctx
        .caller
        .call("download_record", || {
            ctx.caller
                .service()
                .download_record(&remote.remote_identifier, &version)
        })
        .await?;
    if metadata.record_id != record.id {
        return Err(ServiceError::invalid_data(format!(
            "metadata for {} returned for {}",
            metadata.record_id, record.id
        ))
        .into());
    }

    let existing = ctx.store.object(&record.id)?;
    let mut failures = Vec::new();
    let manifest = reconcile_manifest(ctx, schema, &metadata, &mut failures).await?;

    let mut files = BTreeMap::new();
    let mut cached = Vec::new();
    for (slot, file) in &manifest {
        let local = existing
            .as_ref()
            .and_then(|object| object.files.get(slot))
            .filter(|contents| file.matches(&ContentHash::of_bytes(contents)));
        if let Some(contents) = local {
            debug!(record = %record.id, slot = %slot, "file unchanged, skipping download");
            files.insert(slot.clone(), contents.clone());
            continue;
        }
        if let Some(contents) = ctx
            .store
            .cached_file(&record.id, slot)?
            .filter(|contents| file.matches(&ContentHash::of_bytes(contents)))
        {
            debug!(record = %record.id, slot = %slot, "using cached file");
            files.insert(slot.clone(), contents);
            continue;
        }

        match fetch_file(ctx, file).await {
            Ok(contents) => {
                cached.push(Write::CacheFile {
                    id: record.id.clone(),
                    slot: slot.clone(),
                    contents: contents.clone(),
                });
                files.insert(slot.clone(), contents);
            }
            Err(ServiceError::Cancelled) => return Err(RecordError::Cancelled.into()),
            Err(err) => {
                warn!(record = %record.id, slot = %slot, error = %err, "file download failed");
                failures.push(FileError::from_service(slot.clone(), &err));
            }
        }
    }

    if !failures.is_empty() {
        return Err(RecordFailure::with_salvage(
            RecordError::FilesFailed(failures),
            cached,
        ));
    }

    let mut object = existing.unwrap_or_else(|| SyncObject::new(record.id.clone()));
    object
        .fields
        .retain(|name, _| !schema.is_syncable_key(name) && name != schema.primary_key());
    object.fields.extend(
        metadata
            .fields
            .iter()
            .filter(|(name, _)| schema.has_field(name) || *name == schema.primary_key())
            .map(|(name, value)| (name.clone(), value.clone())),
    );
    object.files.retain(|slot, _| !schema.has_file(slot));
    object.files.extend(files);

    let local = record
        .local
        .get_or_insert_with(|| LocalRecord::new(RecordStatus::Normal, version.date));
    local.pending_relationships = metadata
        .relationships
        .iter()
        .filter(|(key, _)| schema.has_relationship(key))
        .map(|(key, target)| (key.clone(), target.clone()))
        .collect();
    local.remote_files = manifest;

    Ok(PendingDownload {
        record,
        object,
        cached,
    })
}

async fn fetch_file(ctx: &TransferContext<'_>, file: &RemoteFile) -> Result<Bytes, ServiceError> {
    let contents = ctx
        .caller
        .call("download_file", || ctx.caller.service().download_file(file))
        .await?;
    if file.matches(&ContentHash::of_bytes(&contents)) {
        Ok(contents)
    } else {
        Err(ServiceError::invalid_data(format!(
            "content hash mismatch for file {}",
            file.remote_identifier
        )))
    }
}

/// Reduces the manifest to one file per declared slot.
///
/// Duplicate entries for a slot are settled by version history: the
/// candidate whose own version is confirmed with the latest date wins.
/// Candidates whose history is gone are dropped; a slot whose candidates
/// are all gone, or whose history cannot be read, is a file failure.
async fn reconcile_manifest(
    ctx: &TransferContext<'_>,
    schema: &TypeSchema,
    metadata: &RecordMetadata,
    failures: &mut Vec<FileError>,
) -> TransferResult<BTreeMap<String, RemoteFile>> {
    let declared = metadata
        .files
        .iter()
        .filter(|file| schema.has_file(&file.identifier))
        .cloned();
    let (unique, duplicates) = partition_duplicates(declared);

    let mut manifest: BTreeMap<String, RemoteFile> = unique
        .into_iter()
        .map(|file| (file.identifier.clone(), file))
        .collect();

    'slots: for (slot, group) in duplicates {
        debug!(
            record = %metadata.record_id,
            slot = %slot,
            candidates = group.len(),
            "reconciling duplicate files"
        );
        let mut candidates: Vec<(RemoteFile, Vec<Version>)> = Vec::with_capacity(group.len());
        for file in group {
            let history = ctx
                .caller
                .call("fetch_file_version_history", || {
                    ctx.caller.service().fetch_file_version_history(&file)
                })
                .await;
            match history {
                Ok(history) => candidates.push((file, history)),
                Err(err) if err.is_not_found() => {
                    debug!(slot = %slot, file = %file.remote_identifier, "duplicate no longer exists");
                }
                Err(ServiceError::Cancelled) => return Err(RecordError::Cancelled.into()),
                Err(err) => {
                    failures.push(FileError::from_service(slot.clone(), &err));
                    continue 'slots;
                }
            }
        }
        match select_newest_confirmed(&candidates) {
            Some(file) => {
                manifest.insert(slot, file.clone());
            }
            None => failures.push(FileError::new(
                slot,
                FileErrorKind::DoesNotExist,
                "no duplicate file exists remotely",
            )),
        }
    }
    Ok(manifest)
}

/// Resolves relationships across a batch of pending downloads and produces
/// the writes of every record that resolves.
///
/// A target resolves when it is downloaded in the same batch or already
/// has an object in the store. Records with an unresolvable target fail
/// and are removed from the batch; this repeats until no more records
/// drop out, so records pointing at a failed record fail too. A failed
/// record keeps nothing but its cached files.
pub(crate) fn settle_downloads(
    store: &dyn ObjectStore,
    registry: &SchemaRegistry,
    pending: Vec<PendingDownload>,
) -> Vec<(RecordId, TransferResult<RecordChanges>)> {
    let mut in_flight: BTreeSet<RecordId> = pending.iter().map(|item| item.id().clone()).collect();
    let mut failed: BTreeMap<RecordId, RecordError> = BTreeMap::new();

    loop {
        let mut dropped = false;
        for item in &pending {
            if !in_flight.contains(item.id()) {
                continue;
            }
            let error = match unresolved_target(store, item, &in_flight) {
                Ok(None) => continue,
                Ok(Some((key, target))) => RecordError::UnresolvedRelationship { key, target },
                Err(err) => RecordError::from(err),
            };
            in_flight.remove(item.id());
            failed.insert(item.id().clone(), error);
            dropped = true;
        }
        if !dropped {
            break;
        }
    }

    pending
        .into_iter()
        .map(|item| {
            let id = item.id().clone();
            let result = match failed.remove(&id) {
                Some(error) => {
                    warn!(record = %id, error = %error, "download discarded");
                    Err(RecordFailure::with_salvage(error, item.cached))
                }
                None => finish(registry, item),
            };
            (id, result)
        })
        .collect()
}

fn unresolved_target(
    store: &dyn ObjectStore,
    item: &PendingDownload,
    in_flight: &BTreeSet<RecordId>,
) -> StoreResult<Option<(String, RecordId)>> {
    let Some(local) = item.record.local.as_ref() else {
        return Ok(None);
    };
    for (key, target) in &local.pending_relationships {
        if in_flight.contains(target) {
            continue;
        }
        if store.object(target)?.is_none() {
            return Ok(Some((key.clone(), target.clone())));
        }
    }
    Ok(None)
}

fn finish(registry: &SchemaRegistry, item: PendingDownload) -> TransferResult<RecordChanges> {
    let PendingDownload {
        mut record,
        mut object,
        ..
    } = item;
    let schema = registry.require(record.id.record_type())?;
    let Some(local) = record.local.as_mut() else {
        return Err(RecordError::DoesNotExist.into());
    };
    let Some(remote) = record.remote.as_mut() else {
        return Err(RecordError::DoesNotExist.into());
    };

    object
        .relationships
        .retain(|key, _| !schema.has_relationship(key));
    object
        .relationships
        .extend(std::mem::take(&mut local.pending_relationships));
    let content_hash = object.content_hash(schema)?;

    local.settle(&remote.version, Some(content_hash));
    remote.status = RecordStatus::Normal;

    debug!(record = %record.id, "record downloaded");
    let id = record.id.clone();
    Ok(RecordChanges::new(vec![
        Write::PutObject(object),
        Write::PutRecord(record),
        Write::ClearCache(id),
    ]))
}
