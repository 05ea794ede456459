//! Remote revision markers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A specific remote revision of a record or file.
///
/// The identifier is opaque and only comparable for equality; ordering is
/// defined on `date` alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Opaque revision identifier.
    pub identifier: String,
    /// Time the revision was created.
    pub date: DateTime<Utc>,
}

impl Version {
    /// Creates a version.
    pub fn new(identifier: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.into(),
            date,
        }
    }

    /// Returns true if both versions name the same revision.
    pub fn same_revision(&self, other: &Version) -> bool {
        self.identifier == other.identifier
    }

    /// Returns true if this revision is strictly newer than `other`.
    pub fn is_newer_than(&self, other: &Version) -> bool {
        self.date > other.date
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identifier, self.date.to_rfc3339())
    }
}
