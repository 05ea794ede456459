//! Benchmark utilities for recsync.
//!
//! Builds deterministic objects, schemas and managed records so benchmark
//! runs are comparable across machines.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use recsync_model::{
    LocalRecord, ManagedRecord, RecordId, RecordMetadata, RecordStatus, RemoteRecord, SyncObject,
    TypeSchema, Version,
};

/// Fixed reference time.
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0)
        .single()
        .unwrap_or_default()
}

/// Schema with `field_count` fields, two file slots and one relationship.
pub fn bench_schema(field_count: usize) -> TypeSchema {
    TypeSchema::new("item", "id")
        .with_fields((0..field_count).map(|i| format!("field_{i}")))
        .with_files(["small", "large"])
        .with_relationships(["parent"])
}

/// Deterministic payload of `size` bytes.
pub fn payload(size: usize, seed: u8) -> Bytes {
    (0..size)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect::<Vec<u8>>()
        .into()
}

/// Object matching [`bench_schema`] with files of `file_size` bytes.
pub fn bench_object(index: usize, field_count: usize, file_size: usize) -> SyncObject {
    let mut object = SyncObject::new(RecordId::new("item", format!("item-{index}")))
        .with_field("id", format!("item-{index}"))
        .with_file("small", payload(file_size / 16 + 1, index as u8))
        .with_file("large", payload(file_size, index as u8))
        .with_relationship("parent", RecordId::new("item", "root"));
    for i in 0..field_count {
        object = object.with_field(format!("field_{i}"), format!("value {index}/{i}"));
    }
    object
}

/// Metadata describing the fields of [`bench_object`].
pub fn bench_metadata(index: usize, field_count: usize) -> RecordMetadata {
    let object = bench_object(index, field_count, 0);
    let mut metadata = RecordMetadata::new(object.id.clone());
    metadata.fields = object
        .fields
        .iter()
        .filter(|(name, _)| name.as_str() != "id")
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    metadata.relationships = object.relationships.clone();
    metadata
}

/// `count` managed records cycling through every status combination.
pub fn bench_records(count: usize) -> Vec<ManagedRecord> {
    let sides: Vec<Option<RecordStatus>> = std::iter::once(None)
        .chain(RecordStatus::ALL.iter().copied().map(Some))
        .collect();
    (0..count)
        .map(|i| {
            let local = sides[i % sides.len()];
            let remote = sides[(i / sides.len()) % sides.len()];
            let date = epoch() + Duration::seconds(i as i64);
            let mut record = ManagedRecord::new(RecordId::new("item", format!("item-{i}")));
            if let Some(status) = local {
                record = record.with_local(LocalRecord::new(status, date));
            }
            if let Some(status) = remote {
                record = record.with_remote(RemoteRecord::new(
                    format!("remote-{i}"),
                    status,
                    Version::new(format!("v{i}"), date),
                ));
            }
            record
        })
        .collect()
}
