//! Persistence of sync bookkeeping.

use crate::error::{StoreError, StoreResult};
use recsync_model::{ChangeToken, ManagedRecord};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write as _};
use std::path::Path;

const FORMAT_VERSION: u32 = 1;

/// Snapshot of the change token and every managed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    /// Format version of the file.
    pub format_version: u32,
    /// Persisted change token.
    pub token: Option<ChangeToken>,
    /// Managed records.
    pub records: Vec<ManagedRecord>,
}

impl StateFile {
    /// Creates a snapshot in the current format.
    pub fn new(token: Option<ChangeToken>, records: Vec<ManagedRecord>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            token,
            records,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|e| StoreError::codec(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        let state: StateFile =
            ciborium::from_reader(bytes).map_err(|e| StoreError::codec(e.to_string()))?;
        if state.format_version != FORMAT_VERSION {
            return Err(StoreError::corrupted(format!(
                "unsupported state format version {}",
                state.format_version
            )));
        }
        Ok(state)
    }

    /// Writes the snapshot atomically.
    ///
    /// The data goes to a sibling temporary file that is synced and then
    /// renamed over `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = path.as_ref();
        let temp_path = path.with_extension("tmp");
        let data = self.encode()?;

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Reads a snapshot, returning `None` if the file does not exist.
    pub fn read(path: impl AsRef<Path>) -> StoreResult<Option<Self>> {
        match fs::read(path.as_ref()) {
            Ok(data) => Self::decode(&data).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
