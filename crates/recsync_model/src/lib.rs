//! # recsync model
//!
//! Record model and pure sync logic for recsync.
//!
//! This crate provides:
//! - `RecordId`, `Version`, `ContentHash` and the record status state machine
//! - `LocalRecord`, `RemoteRecord` and their pairing `ManagedRecord`
//! - The declared syncable surface (`Syncable`, `TypeSchema`, `SchemaRegistry`)
//! - The exhaustive sync action table and the store predicates derived from it
//! - Conflict policies
//! - CBOR record metadata and canonical content hashing
//!
//! This is a pure model crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod conflict;
mod error;
mod file;
mod hash;
mod id;
mod metadata;
mod object;
mod record;
mod schema;
mod status;
mod token;
mod value;
mod version;

pub use action::{resolve_action, RecordPredicate, SyncAction};
pub use conflict::{ConflictDecision, ConflictPolicy};
pub use error::{ModelError, ModelResult};
pub use file::{partition_duplicates, select_newest_confirmed, RemoteFile};
pub use hash::ContentHash;
pub use id::RecordId;
pub use metadata::{MetadataPatch, RecordMetadata};
pub use object::{SyncObject, Syncable};
pub use record::{LocalRecord, LockFlags, ManagedRecord, RemoteRecord};
pub use schema::{SchemaRegistry, TypeSchema};
pub use status::RecordStatus;
pub use token::ChangeToken;
pub use value::FieldValue;
pub use version::Version;
