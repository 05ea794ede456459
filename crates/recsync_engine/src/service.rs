//! The remote service capability.

use crate::error::ServiceResult;
use async_trait::async_trait;
use bytes::Bytes;
use recsync_model::{
    ChangeToken, MetadataPatch, RecordId, RecordMetadata, RemoteFile, RemoteRecord, Version,
};

/// A remote record together with the record it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Local identity of the record.
    pub id: RecordId,
    /// Remote state of the record.
    pub record: RemoteRecord,
}

impl RemoteEntry {
    /// Creates an entry.
    pub fn new(id: RecordId, record: RemoteRecord) -> Self {
        Self { id, record }
    }
}

/// Result of a full fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAll {
    /// Every remote record.
    pub records: Vec<RemoteEntry>,
    /// Token for the next incremental fetch.
    pub token: ChangeToken,
}

/// Result of an incremental fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchChanges {
    /// Records created or changed since the token.
    pub updated: Vec<RemoteEntry>,
    /// Remote identifiers deleted since the token.
    pub deleted: Vec<String>,
    /// Token for the next incremental fetch.
    pub token: ChangeToken,
}

/// A remote record service.
///
/// Every call may fail with rate limiting, expired authentication, a
/// missing item, invalid data or a transport error. Calls are cancelled by
/// dropping the returned future.
#[async_trait]
pub trait Service: Send + Sync {
    /// Refreshes credentials.
    async fn authenticate(&self) -> ServiceResult<()>;

    /// Fetches every remote record.
    async fn fetch_all_records(&self) -> ServiceResult<FetchAll>;

    /// Fetches records changed since `token`.
    ///
    /// Fails with `InvalidToken` if the token is stale or unknown.
    async fn fetch_changed_records(&self, token: &ChangeToken) -> ServiceResult<FetchChanges>;

    /// Creates or replaces the remote copy of a record.
    async fn upload_record(&self, metadata: &RecordMetadata) -> ServiceResult<RemoteRecord>;

    /// Downloads the metadata of one remote revision.
    async fn download_record(
        &self,
        remote_identifier: &str,
        version: &Version,
    ) -> ServiceResult<RecordMetadata>;

    /// Uploads the contents of one file slot.
    async fn upload_file(
        &self,
        record: &RecordId,
        slot: &str,
        contents: Bytes,
    ) -> ServiceResult<RemoteFile>;

    /// Downloads a file.
    async fn download_file(&self, file: &RemoteFile) -> ServiceResult<Bytes>;

    /// Deletes a file.
    async fn delete_file(&self, file: &RemoteFile) -> ServiceResult<()>;

    /// Deletes a record.
    async fn delete_record(&self, remote_identifier: &str) -> ServiceResult<()>;

    /// Applies a metadata patch and returns the updated remote state.
    async fn update_metadata(
        &self,
        remote_identifier: &str,
        patch: &MetadataPatch,
    ) -> ServiceResult<RemoteRecord>;

    /// Lists the known revisions of a file.
    async fn fetch_file_version_history(&self, file: &RemoteFile) -> ServiceResult<Vec<Version>>;
}
