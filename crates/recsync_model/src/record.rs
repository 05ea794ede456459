//! Local and remote bookkeeping for tracked records.

use crate::action::{resolve_action, SyncAction};
use crate::conflict::ConflictDecision;
use crate::file::RemoteFile;
use crate::hash::ContentHash;
use crate::id::RecordId;
use crate::status::RecordStatus;
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Local sync state of one tracked object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRecord {
    /// Local status.
    pub status: RecordStatus,
    /// Remote version the local copy was last synced with.
    pub version_identifier: Option<String>,
    /// Time of the last syncable local change.
    pub modification_date: DateTime<Utc>,
    /// Hash of the syncable surface at the last sync.
    pub content_hash: Option<ContentHash>,
    /// Files confirmed uploaded, keyed by slot.
    pub remote_files: BTreeMap<String, RemoteFile>,
    /// Relationship targets awaiting resolution during a download.
    #[serde(skip)]
    pub pending_relationships: BTreeMap<String, RecordId>,
}

impl LocalRecord {
    /// Creates a record with no sync history.
    pub fn new(status: RecordStatus, modification_date: DateTime<Utc>) -> Self {
        Self {
            status,
            version_identifier: None,
            modification_date,
            content_hash: None,
            remote_files: BTreeMap::new(),
            pending_relationships: BTreeMap::new(),
        }
    }

    /// Marks the local copy changed at `now`.
    ///
    /// Also revives a deleted record whose object was recreated.
    pub fn mark_updated(&mut self, now: DateTime<Utc>) {
        self.status = RecordStatus::Updated;
        self.modification_date = now;
    }

    /// Marks the local copy deleted at `now`.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.status = RecordStatus::Deleted;
        self.modification_date = now;
    }

    /// Records agreement with a remote version.
    pub fn settle(&mut self, version: &Version, content_hash: Option<ContentHash>) {
        self.status = RecordStatus::Normal;
        self.version_identifier = Some(version.identifier.clone());
        if content_hash.is_some() {
            self.content_hash = content_hash;
        }
    }

    /// Returns true if the local copy was last synced with `version`.
    pub fn is_at(&self, version: &Version) -> bool {
        self.version_identifier.as_deref() == Some(version.identifier.as_str())
    }
}

/// Remote sync state of one tracked object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Identity of the record on the remote service.
    pub remote_identifier: String,
    /// Remote status.
    pub status: RecordStatus,
    /// Current remote revision.
    pub version: Version,
    /// True while the remote copy references records not yet uploaded.
    pub is_locked: bool,
    /// Last revision that was not locked.
    pub previous_unlocked_version: Option<Version>,
    /// Author of the current revision.
    pub author: Option<String>,
    /// Human readable name.
    pub display_name: Option<String>,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
}

impl RemoteRecord {
    /// Creates an unlocked remote record.
    pub fn new(remote_identifier: impl Into<String>, status: RecordStatus, version: Version) -> Self {
        Self {
            remote_identifier: remote_identifier.into(),
            status,
            version,
            is_locked: false,
            previous_unlocked_version: None,
            author: None,
            display_name: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Version that may be downloaded.
    ///
    /// The current version unless it is locked, in which case the last
    /// unlocked one, if any.
    pub fn readable_version(&self) -> Option<&Version> {
        if self.is_locked {
            self.previous_unlocked_version.as_ref()
        } else {
            Some(&self.version)
        }
    }
}

/// Per-record lock bit flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LockFlags(u8);

impl LockFlags {
    /// No flags.
    pub const NONE: LockFlags = LockFlags(0);
    /// The last upload went out locked.
    pub const LOCKED: LockFlags = LockFlags(0b01);
    /// A metadata patch clearing the remote lock is pending.
    pub const UNLOCK_PENDING: LockFlags = LockFlags(0b10);

    /// Creates flags from raw bits, dropping unknown bits.
    pub fn from_bits(bits: u8) -> Self {
        LockFlags(bits & 0b11)
    }

    /// Returns the raw bits.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if every flag in `other` is set.
    pub fn contains(self, other: LockFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the flags in `other`.
    pub fn insert(&mut self, other: LockFlags) {
        self.0 |= other.0;
    }

    /// Clears the flags in `other`.
    pub fn remove(&mut self, other: LockFlags) {
        self.0 &= !other.0;
    }

    /// Returns true if no flag is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for LockFlags {
    type Output = LockFlags;

    fn bitor(self, rhs: LockFlags) -> LockFlags {
        LockFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for LockFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(LockFlags::LOCKED) {
            names.push("LOCKED");
        }
        if self.contains(LockFlags::UNLOCK_PENDING) {
            names.push("UNLOCK_PENDING");
        }
        write!(f, "LockFlags({})", names.join("|"))
    }
}

/// The pairing of local and remote state for one record ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedRecord {
    /// Record identity.
    pub id: RecordId,
    /// Local side, absent if the object is not tracked locally.
    pub local: Option<LocalRecord>,
    /// Remote side, absent if the remote service has no copy.
    pub remote: Option<RemoteRecord>,
    /// Excluded from transfers until resolved.
    pub is_conflicted: bool,
    /// Whether the record takes part in sync at all.
    pub is_syncing_enabled: bool,
    /// Upload lock state.
    pub lock_flags: LockFlags,
}

impl ManagedRecord {
    /// Creates an untracked pairing with syncing enabled.
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            local: None,
            remote: None,
            is_conflicted: false,
            is_syncing_enabled: true,
            lock_flags: LockFlags::NONE,
        }
    }

    /// Builder form setting the local side.
    pub fn with_local(mut self, local: LocalRecord) -> Self {
        self.local = Some(local);
        self
    }

    /// Builder form setting the remote side.
    pub fn with_remote(mut self, remote: RemoteRecord) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Local status, `None` if absent.
    pub fn local_status(&self) -> Option<RecordStatus> {
        self.local.as_ref().map(|local| local.status)
    }

    /// Remote status, `None` if absent.
    pub fn remote_status(&self) -> Option<RecordStatus> {
        self.remote.as_ref().map(|remote| remote.status)
    }

    /// Action the current statuses require.
    pub fn action(&self) -> SyncAction {
        resolve_action(self.local_status(), self.remote_status())
    }

    /// Applies a conflict decision by normalizing the losing side.
    ///
    /// `Upload` makes the remote side look unchanged so the upload stage
    /// picks the record up; `Download` does the same for the local side.
    /// `Flag` marks the record conflicted.
    pub fn apply_decision(&mut self, decision: ConflictDecision) {
        match decision {
            ConflictDecision::Upload => {
                if let Some(remote) = self.remote.as_mut() {
                    remote.status = RecordStatus::Normal;
                }
                self.is_conflicted = false;
            }
            ConflictDecision::Download => {
                if let Some(local) = self.local.as_mut() {
                    local.status = RecordStatus::Normal;
                }
                self.is_conflicted = false;
            }
            ConflictDecision::Flag => self.is_conflicted = true,
        }
    }
}
