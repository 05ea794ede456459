//! Record status state machine.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sync status of one side (local or remote) of a managed record.
///
/// Transitions:
/// - `Normal -> Updated` when the side changes
/// - `Updated -> Normal` once the change has been transferred
/// - `* -> Deleted` when the side reports deletion
///
/// Persisted as a numeric code (0 normal, 1 updated, 2 deleted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RecordStatus {
    /// In agreement with the last synced state.
    Normal,
    /// Changed since the last successful sync.
    Updated,
    /// Deleted on this side.
    Deleted,
}

impl RecordStatus {
    /// All statuses, in code order.
    pub const ALL: [RecordStatus; 3] = [
        RecordStatus::Normal,
        RecordStatus::Updated,
        RecordStatus::Deleted,
    ];

    /// Converts to the persisted code.
    pub fn to_code(self) -> u8 {
        match self {
            RecordStatus::Normal => 0,
            RecordStatus::Updated => 1,
            RecordStatus::Deleted => 2,
        }
    }

    /// Converts from a persisted code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RecordStatus::Normal),
            1 => Some(RecordStatus::Updated),
            2 => Some(RecordStatus::Deleted),
            _ => None,
        }
    }

    /// Returns the lowercase status name.
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Normal => "normal",
            RecordStatus::Updated => "updated",
            RecordStatus::Deleted => "deleted",
        }
    }
}

impl From<RecordStatus> for u8 {
    fn from(status: RecordStatus) -> Self {
        status.to_code()
    }
}

impl TryFrom<u8> for RecordStatus {
    type Error = ModelError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        RecordStatus::from_code(code).ok_or(ModelError::InvalidStatusCode { code })
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(RecordStatus::Normal.to_code(), 0);
        assert_eq!(RecordStatus::Updated.to_code(), 1);
        assert_eq!(RecordStatus::Deleted.to_code(), 2);

        for status in RecordStatus::ALL {
            assert_eq!(RecordStatus::from_code(status.to_code()), Some(status));
        }
        assert_eq!(RecordStatus::from_code(3), None);
    }

    #[test]
    fn invalid_code_is_an_error() {
        let err = RecordStatus::try_from(7).unwrap_err();
        assert_eq!(err, ModelError::InvalidStatusCode { code: 7 });
    }
}
