//! # recsync engine
//!
//! Client-side bidirectional sync between an object store and a remote
//! record service.
//!
//! This crate provides:
//! - The [`Service`] capability and [`MemoryService`], a complete
//!   in-memory remote with failure injection
//! - [`ServiceCaller`], rate-limit backoff and one-shot reauthentication
//!   around every remote call
//! - Per-record upload, download, delete and metadata operations with file
//!   deduplication and relationship locking
//! - [`ChangeTracker`], local change seeding and token-based remote fetches
//! - The staged pipeline and the [`SyncEngine`] façade
//!
//! ## Pipeline
//!
//! Every run executes, in order:
//! 1. `seed`: turn local commits into record transitions
//! 2. `fetch_changes`: apply remote changes since the stored token
//! 3. `detect_conflicts`: apply each type's conflict policy
//! 4. `verify_conflicts`: clear conflicts whose contents hash equal
//! 5. `upload`, then `update_metadata` to unlock dependent records
//! 6. `download`, resolving relationships across the batch
//! 7. `delete`
//!
//! Each stage commits its results in one transaction before the next
//! starts. Conflicted records and records with syncing disabled are
//! skipped by every transfer stage.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use recsync_engine::{MemoryService, SyncConfig, SyncEngine};
//! use recsync_model::{RecordId, SchemaRegistry, SyncObject, TypeSchema};
//! use recsync_store::MemoryStore;
//!
//! # tokio_test_block_on(async {
//! let registry = SchemaRegistry::new()
//!     .with(TypeSchema::new("note", "id").with_fields(["title"]));
//! let store = Arc::new(MemoryStore::new());
//! let service = Arc::new(MemoryService::new());
//! let engine = SyncEngine::new(SyncConfig::default(), registry, store.clone(), service.clone());
//!
//! store
//!     .put_object(
//!         SyncObject::new(RecordId::new("note", "n1"))
//!             .with_field("id", "n1")
//!             .with_field("title", "Hello"),
//!     )
//!     .unwrap();
//! let outcome = engine.sync().await.unwrap();
//! assert!(outcome.is_success());
//! assert_eq!(service.record_count(), 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(future: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(future)
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod call;
mod config;
mod conflict;
mod engine;
mod error;
mod memory;
mod pipeline;
mod report;
mod service;
mod state;
mod tracker;
mod transfer;

pub use call::ServiceCaller;
pub use config::{RetryConfig, SyncConfig, MAX_RETRIES};
pub use engine::SyncEngine;
pub use error::{
    FileError, FileErrorKind, RecordError, RecordErrorKind, RecordResult, ServiceError,
    ServiceResult, SyncError, SyncResult,
};
pub use memory::{MemoryService, Operation};
pub use report::{StageSummary, SyncOutcome, SyncReport};
pub use service::{FetchAll, FetchChanges, RemoteEntry, Service};
pub use state::{Stage, SyncProgress, SyncState, SyncStats};
pub use tracker::{ChangeTracker, FetchOutcome, SeedOutcome};
