//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records, statuses and sample domain
//! values.

use crate::fixtures::{Folder, Note};
use bytes::Bytes;
use proptest::prelude::*;
use recsync_model::{FieldValue, RecordId, RecordStatus};

/// Strategy for generating non-empty identifiers.
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{1,12}").expect("Invalid regex")
}

/// Strategy for generating record IDs of the sample types.
pub fn record_id_strategy() -> impl Strategy<Value = RecordId> {
    (prop::sample::select(vec!["note", "folder"]), identifier_strategy())
        .prop_map(|(record_type, identifier)| RecordId::new(record_type, identifier))
}

/// Strategy for generating a status.
pub fn status_strategy() -> impl Strategy<Value = RecordStatus> {
    prop::sample::select(RecordStatus::ALL.to_vec())
}

/// Strategy for generating one side of a record: absent or a status.
pub fn side_strategy() -> impl Strategy<Value = Option<RecordStatus>> {
    prop::option::of(status_strategy())
}

/// Strategy for generating scalar field values.
pub fn field_value_strategy() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Null),
        any::<bool>().prop_map(FieldValue::Bool),
        any::<i64>().prop_map(FieldValue::Integer),
        "[ -~]{0,32}".prop_map(FieldValue::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(FieldValue::Bytes),
    ]
}

/// Strategy for generating file contents.
pub fn file_strategy() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..256).prop_map(Bytes::from)
}

/// Strategy for generating notes with optional files and folder.
pub fn note_strategy() -> impl Strategy<Value = Note> {
    (
        identifier_strategy(),
        "[ -~]{0,24}",
        "[ -~]{0,64}",
        any::<i64>(),
        prop::option::of(file_strategy()),
        prop::option::of(file_strategy()),
        prop::option::of(identifier_strategy()),
    )
        .prop_map(|(id, title, body, viewed, attachment, cover, folder)| Note {
            id,
            title,
            body,
            viewed,
            attachment,
            cover,
            folder,
        })
}

/// Strategy for generating folders.
pub fn folder_strategy() -> impl Strategy<Value = Folder> {
    (identifier_strategy(), "[ -~]{0,24}").prop_map(|(id, name)| Folder::new(id, name))
}
