//! # recsync store
//!
//! The object store capability consumed by the sync engine.
//!
//! This crate provides:
//! - [`ObjectStore`], the trait a host store implements
//! - [`StoreTransaction`], a buffered write log committed atomically
//! - [`CommitEvent`] and commit hooks for local change observation
//! - [`MemoryStore`], an in-memory reference implementation
//! - [`StateFile`], atomic CBOR persistence of sync bookkeeping
//!
//! ## Example
//!
//! ```rust
//! use recsync_model::{RecordId, SyncObject};
//! use recsync_store::{MemoryStore, ObjectStore};
//!
//! let store = MemoryStore::new();
//! let note = SyncObject::new(RecordId::new("note", "n1")).with_field("title", "Hi");
//! let event = store.put_object(note).unwrap();
//! assert_eq!(event.inserted.len(), 1);
//! assert!(store.object(&RecordId::new("note", "n1")).unwrap().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod memory;
mod state_file;
mod store;
mod transaction;

pub use error::{StoreError, StoreResult};
pub use event::{CommitEvent, CommitHook, CommitOrigin};
pub use memory::MemoryStore;
pub use state_file::StateFile;
pub use store::ObjectStore;
pub use transaction::{StoreTransaction, Write};
