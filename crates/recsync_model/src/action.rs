//! The sync action table and the store predicates derived from it.

use crate::record::{LockFlags, ManagedRecord};
use crate::status::RecordStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a record needs for its two sides to agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncAction {
    /// Already in agreement.
    None,
    /// Push the local copy.
    Upload,
    /// Pull the remote copy.
    Download,
    /// Remove both sides.
    Delete,
    /// Both sides changed.
    Conflict,
}

impl SyncAction {
    /// All actions.
    pub const ALL: [SyncAction; 5] = [
        SyncAction::None,
        SyncAction::Upload,
        SyncAction::Download,
        SyncAction::Delete,
        SyncAction::Conflict,
    ];

    /// Returns the lowercase action name.
    pub fn as_str(self) -> &'static str {
        match self {
            SyncAction::None => "none",
            SyncAction::Upload => "upload",
            SyncAction::Download => "download",
            SyncAction::Delete => "delete",
            SyncAction::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a pair of statuses to the action that reconciles them.
///
/// `None` stands for an absent side. Every one of the 16 combinations is
/// listed; the match has no wildcard arm.
pub fn resolve_action(local: Option<RecordStatus>, remote: Option<RecordStatus>) -> SyncAction {
    use RecordStatus::{Deleted, Normal, Updated};

    match (local, remote) {
        (None, None) => SyncAction::Delete,
        (None, Some(Normal)) => SyncAction::Download,
        (None, Some(Updated)) => SyncAction::Download,
        (None, Some(Deleted)) => SyncAction::Delete,

        (Some(Normal), None) => SyncAction::Upload,
        (Some(Normal), Some(Normal)) => SyncAction::None,
        (Some(Normal), Some(Updated)) => SyncAction::Download,
        (Some(Normal), Some(Deleted)) => SyncAction::Delete,

        (Some(Updated), None) => SyncAction::Upload,
        (Some(Updated), Some(Normal)) => SyncAction::Upload,
        (Some(Updated), Some(Updated)) => SyncAction::Conflict,
        (Some(Updated), Some(Deleted)) => SyncAction::Upload,

        (Some(Deleted), None) => SyncAction::Delete,
        (Some(Deleted), Some(Normal)) => SyncAction::Delete,
        (Some(Deleted), Some(Updated)) => SyncAction::Conflict,
        (Some(Deleted), Some(Deleted)) => SyncAction::Delete,
    }
}

const SIDES: [Option<RecordStatus>; 4] = [
    None,
    Some(RecordStatus::Normal),
    Some(RecordStatus::Updated),
    Some(RecordStatus::Deleted),
];

fn slot(status: Option<RecordStatus>) -> usize {
    match status {
        None => 0,
        Some(RecordStatus::Normal) => 1,
        Some(RecordStatus::Updated) => 2,
        Some(RecordStatus::Deleted) => 3,
    }
}

fn bit(local: Option<RecordStatus>, remote: Option<RecordStatus>) -> u16 {
    1 << (slot(local) * 4 + slot(remote))
}

/// Filter selecting managed records for a stage.
///
/// Holds the set of accepted (local, remote) status combinations as a
/// 16-bit mask plus flag filters.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecordPredicate {
    combinations: u16,
    conflicted: Option<bool>,
    syncing_enabled_only: bool,
    required_flags: LockFlags,
}

impl RecordPredicate {
    /// Matches every record.
    pub fn all() -> Self {
        Self {
            combinations: u16::MAX,
            conflicted: None,
            syncing_enabled_only: false,
            required_flags: LockFlags::NONE,
        }
    }

    /// Transferable records whose statuses require `action`.
    pub fn for_action(action: SyncAction) -> Self {
        let mut combinations = 0;
        for local in SIDES {
            for remote in SIDES {
                if resolve_action(local, remote) == action {
                    combinations |= bit(local, remote);
                }
            }
        }
        Self {
            combinations,
            conflicted: Some(false),
            syncing_enabled_only: true,
            required_flags: LockFlags::NONE,
        }
    }

    /// Syncing-enabled records currently flagged conflicted.
    pub fn conflicted() -> Self {
        Self {
            combinations: u16::MAX,
            conflicted: Some(true),
            syncing_enabled_only: true,
            required_flags: LockFlags::NONE,
        }
    }

    /// Transferable records waiting for a remote unlock.
    pub fn pending_unlock() -> Self {
        Self {
            combinations: u16::MAX,
            conflicted: Some(false),
            syncing_enabled_only: true,
            required_flags: LockFlags::UNLOCK_PENDING,
        }
    }

    /// Also accepts records with syncing disabled.
    pub fn including_disabled(mut self) -> Self {
        self.syncing_enabled_only = false;
        self
    }

    /// Returns true if the record passes the filter.
    pub fn matches(&self, record: &ManagedRecord) -> bool {
        if self.combinations & bit(record.local_status(), record.remote_status()) == 0 {
            return false;
        }
        if let Some(conflicted) = self.conflicted {
            if record.is_conflicted != conflicted {
                return false;
            }
        }
        if self.syncing_enabled_only && !record.is_syncing_enabled {
            return false;
        }
        record.lock_flags.contains(self.required_flags)
    }
}

fn side_name(status: Option<RecordStatus>) -> &'static str {
    status.map_or("absent", RecordStatus::as_str)
}

impl fmt::Debug for RecordPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordPredicate({self})")
    }
}

impl fmt::Display for RecordPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut clauses = Vec::new();
        if self.combinations != u16::MAX {
            let pairs: Vec<String> = SIDES
                .iter()
                .flat_map(|local| SIDES.iter().map(move |remote| (*local, *remote)))
                .filter(|(local, remote)| self.combinations & bit(*local, *remote) != 0)
                .map(|(local, remote)| format!("({},{})", side_name(local), side_name(remote)))
                .collect();
            clauses.push(format!("(local,remote)∈{{{}}}", pairs.join(",")));
        }
        if let Some(conflicted) = self.conflicted {
            clauses.push(format!("conflicted={conflicted}"));
        }
        if self.syncing_enabled_only {
            clauses.push("syncing_enabled".to_string());
        }
        if !self.required_flags.is_empty() {
            clauses.push(format!("flags⊇{:?}", self.required_flags));
        }
        if clauses.is_empty() {
            f.write_str("true")
        } else {
            f.write_str(&clauses.join(" AND "))
        }
    }
}
