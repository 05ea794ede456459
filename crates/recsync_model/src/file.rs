//! Remote file descriptors and duplicate reconciliation.

use crate::hash::ContentHash;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A file uploaded for one declared slot of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Slot name on the owning object.
    pub identifier: String,
    /// Identity of the file on the remote service.
    pub remote_identifier: String,
    /// Remote revision of the file.
    pub version_identifier: String,
    /// Hash of the file contents.
    pub content_hash: ContentHash,
    /// Size in bytes.
    pub size: u64,
}

impl RemoteFile {
    /// Returns true if `contents_hash` matches this file.
    pub fn matches(&self, contents_hash: &ContentHash) -> bool {
        &self.content_hash == contents_hash
    }
}

/// Splits a manifest into files with a unique slot and groups of duplicates.
///
/// Entries repeating both the slot and the remote identifier are the same
/// file and collapse into one. Groups in the second map always hold at
/// least two distinct remote identifiers.
pub fn partition_duplicates(
    files: impl IntoIterator<Item = RemoteFile>,
) -> (Vec<RemoteFile>, BTreeMap<String, Vec<RemoteFile>>) {
    let mut by_slot: BTreeMap<String, Vec<RemoteFile>> = BTreeMap::new();
    for file in files {
        let group = by_slot.entry(file.identifier.clone()).or_default();
        if !group
            .iter()
            .any(|existing| existing.remote_identifier == file.remote_identifier)
        {
            group.push(file);
        }
    }

    let mut unique = Vec::new();
    let mut duplicates = BTreeMap::new();
    for (slot, mut group) in by_slot {
        if group.len() == 1 {
            unique.extend(group.pop());
        } else {
            duplicates.insert(slot, group);
        }
    }
    (unique, duplicates)
}

/// Picks the candidate whose own version is confirmed by its history with
/// the latest date.
///
/// A candidate is confirmed when its `version_identifier` appears in the
/// version history fetched for it. When no candidate is confirmed, the
/// first one is kept.
pub fn select_newest_confirmed(candidates: &[(RemoteFile, Vec<Version>)]) -> Option<&RemoteFile> {
    candidates
        .iter()
        .filter_map(|(file, history)| {
            history
                .iter()
                .find(|version| version.identifier == file.version_identifier)
                .map(|version| (file, version.date))
        })
        .max_by_key(|(_, date)| *date)
        .map(|(file, _)| file)
        .or_else(|| candidates.first().map(|(file, _)| file))
}
