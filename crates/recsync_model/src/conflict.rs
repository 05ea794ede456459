//! Conflict policies and decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a record type resolves a record changed on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Keep the local copy (force upload).
    Local,
    /// Keep the remote copy (force download).
    Remote,
    /// Keep whichever side changed last.
    Newest,
    /// Keep whichever side changed first.
    Oldest,
    /// Flag the record for manual resolution.
    #[default]
    Conflict,
}

impl ConflictPolicy {
    /// Converts to a code.
    pub fn to_code(self) -> u8 {
        match self {
            ConflictPolicy::Local => 0,
            ConflictPolicy::Remote => 1,
            ConflictPolicy::Newest => 2,
            ConflictPolicy::Oldest => 3,
            ConflictPolicy::Conflict => 4,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ConflictPolicy::Local),
            1 => Some(ConflictPolicy::Remote),
            2 => Some(ConflictPolicy::Newest),
            3 => Some(ConflictPolicy::Oldest),
            4 => Some(ConflictPolicy::Conflict),
            _ => None,
        }
    }

    /// Decides between the two sides given their change dates.
    ///
    /// `newest` and `oldest` flag the record when the dates are equal.
    pub fn decide(self, local_modified: DateTime<Utc>, remote_date: DateTime<Utc>) -> ConflictDecision {
        match self {
            ConflictPolicy::Local => ConflictDecision::Upload,
            ConflictPolicy::Remote => ConflictDecision::Download,
            ConflictPolicy::Newest if local_modified > remote_date => ConflictDecision::Upload,
            ConflictPolicy::Newest if local_modified < remote_date => ConflictDecision::Download,
            ConflictPolicy::Oldest if local_modified < remote_date => ConflictDecision::Upload,
            ConflictPolicy::Oldest if local_modified > remote_date => ConflictDecision::Download,
            ConflictPolicy::Newest | ConflictPolicy::Oldest | ConflictPolicy::Conflict => {
                ConflictDecision::Flag
            }
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictPolicy::Local => "local",
            ConflictPolicy::Remote => "remote",
            ConflictPolicy::Newest => "newest",
            ConflictPolicy::Oldest => "oldest",
            ConflictPolicy::Conflict => "conflict",
        };
        f.write_str(name)
    }
}

/// Outcome of resolving one conflicted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictDecision {
    /// Push the local copy.
    Upload,
    /// Pull the remote copy.
    Download,
    /// Leave the record conflicted for manual resolution.
    Flag,
}

impl fmt::Display for ConflictDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictDecision::Upload => "upload",
            ConflictDecision::Download => "download",
            ConflictDecision::Flag => "flag",
        };
        f.write_str(name)
    }
}
