//! End-to-end sync runs between memory stores and a shared memory service.

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use recsync_engine::{
    FileErrorKind, Operation, RecordError, RetryConfig, ServiceError, Stage, SyncConfig,
    SyncError, SyncState,
};
use recsync_model::{
    ConflictDecision, ConflictPolicy, LockFlags, RecordId, RecordStatus, SyncObject, Syncable,
};
use recsync_testkit::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn statuses(harness: &TestHarness, id: &RecordId) -> (Option<RecordStatus>, Option<RecordStatus>) {
    let record = harness.record(id).expect("record is tracked");
    (record.local_status(), record.remote_status())
}

// ============================================================================
// Upload and download
// ============================================================================

#[tokio::test]
async fn local_create_is_uploaded() {
    init_tracing();
    let h = TestHarness::new();
    let id = Note::id_of("n1");
    h.put(&Note::new("n1", "Hello").with_body("World"));

    let outcome = h.sync().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.report().result(&id), Some(&Ok(Stage::Upload)));

    let record = h.record(&id).unwrap();
    let local = record.local.as_ref().unwrap();
    let remote = record.remote.as_ref().unwrap();
    assert_eq!(local.status, RecordStatus::Normal);
    assert_eq!(remote.status, RecordStatus::Normal);
    assert!(local.is_at(&remote.version));
    assert!(local.content_hash.is_some());

    let metadata = h.service.remote_metadata(&id).unwrap();
    assert_eq!(metadata.fields["title"].as_text(), Some("Hello"));
    assert!(!metadata.fields.contains_key("viewed"));
    assert!(!metadata.locked);

    assert_eq!(h.engine.state(), SyncState::Synced);
    let stats = h.engine.stats();
    assert_eq!(stats.records_uploaded, 1);
    assert_eq!(stats.cycles_completed, 1);
    assert_eq!(stats.full_fetches, 1);
}

#[tokio::test]
async fn second_device_receives_fields_files_and_relationships() {
    let a = TestHarness::new();
    let note = Note::new("n1", "Hello")
        .with_body("Body")
        .with_attachment(Bytes::from_static(b"attachment bytes"))
        .with_cover(Bytes::from_static(b"cover bytes"))
        .in_folder("f1");
    a.put(&Folder::new("f1", "Inbox"));
    a.put(&note);
    assert!(a.sync().await.is_success());

    let b = a.device();
    let outcome = b.sync().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.report().succeeded_in(Stage::Download), 2);

    assert_eq!(b.get::<Note>(&Note::id_of("n1")), Some(note));
    assert_eq!(
        b.get::<Folder>(&Folder::id_of("f1")),
        Some(Folder::new("f1", "Inbox"))
    );
    assert_eq!(
        statuses(&b, &Note::id_of("n1")),
        (Some(RecordStatus::Normal), Some(RecordStatus::Normal))
    );
    let local = b.record(&Note::id_of("n1")).unwrap().local.unwrap();
    assert_eq!(local.remote_files.len(), 2);
    assert_eq!(b.store.cached_file_count(), 0);
}

#[tokio::test]
async fn repeated_sync_transfers_nothing() {
    let a = TestHarness::new();
    a.put(&Folder::new("f1", "Inbox"));
    a.put(
        &Note::new("n1", "Hello")
            .with_attachment(Bytes::from_static(b"data"))
            .in_folder("f1"),
    );
    assert!(a.sync().await.is_success());
    let b = a.device();
    assert!(b.sync().await.is_success());

    for harness in [&a, &b] {
        harness.service.reset_calls();
        let outcome = harness.sync().await;
        assert!(outcome.is_success());
        assert!(outcome.report().results.is_empty());
        assert_eq!(harness.service.calls(Operation::UploadFile), 0);
        assert_eq!(harness.service.calls(Operation::UploadRecord), 0);
        assert_eq!(harness.service.calls(Operation::DownloadRecord), 0);
        assert_eq!(harness.service.calls(Operation::DownloadFile), 0);
    }
}

#[tokio::test]
async fn incidental_changes_are_not_uploaded() {
    let h = TestHarness::new();
    let mut note = Note::new("n1", "Hello");
    h.put(&note);
    assert!(h.sync().await.is_success());

    note.viewed = 42;
    h.put(&note);
    h.service.reset_calls();
    let outcome = h.sync().await;
    assert!(outcome.report().results.is_empty());
    assert_eq!(h.service.calls(Operation::UploadRecord), 0);
}

#[tokio::test]
async fn remote_edit_is_downloaded() {
    let a = TestHarness::new();
    a.put(&Note::new("n1", "Hello"));
    assert!(a.sync().await.is_success());
    let b = a.device();
    assert!(b.sync().await.is_success());

    a.put(&Note::new("n1", "Edited").with_body("More"));
    assert!(a.sync().await.is_success());

    let outcome = b.sync().await;
    assert!(outcome.is_success());
    assert!(!outcome.report().full_fetch);
    let received = b.get::<Note>(&Note::id_of("n1")).unwrap();
    assert_eq!(received.title, "Edited");
    assert_eq!(received.body, "More");
}

#[tokio::test]
async fn unchanged_files_are_not_uploaded_again() {
    let h = TestHarness::new();
    let note = Note::new("n1", "Hello").with_attachment(Bytes::from_static(b"data"));
    h.put(&note);
    assert!(h.sync().await.is_success());
    assert_eq!(h.service.calls(Operation::UploadFile), 1);

    h.put(&note.clone().with_body("changed"));
    h.service.reset_calls();
    assert!(h.sync().await.is_success());
    assert_eq!(h.service.calls(Operation::UploadRecord), 1);
    assert_eq!(h.service.calls(Operation::UploadFile), 0);
}

// ============================================================================
// Deletion
// ============================================================================

#[tokio::test]
async fn local_delete_removes_remote_record_and_files() {
    let a = TestHarness::new();
    let id = Note::id_of("n1");
    a.put(&Note::new("n1", "Hello").with_attachment(Bytes::from_static(b"data")));
    assert!(a.sync().await.is_success());
    let b = a.device();
    assert!(b.sync().await.is_success());
    assert_eq!(a.service.file_count(), 1);

    a.delete(&id);
    let outcome = a.sync().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.report().result(&id), Some(&Ok(Stage::Delete)));
    assert!(a.record(&id).is_none());
    assert_eq!(a.service.record_count(), 0);
    assert_eq!(a.service.file_count(), 0);

    assert!(b.sync().await.is_success());
    assert!(b.get::<Note>(&id).is_none());
    assert!(b.record(&id).is_none());
}

#[tokio::test]
async fn remote_delete_removes_local_object() {
    let h = TestHarness::new();
    let id = Note::id_of("n1");
    h.put(&Note::new("n1", "Hello"));
    assert!(h.sync().await.is_success());

    assert!(h.service.delete_remote(&id));
    let outcome = h.sync().await;
    assert!(outcome.is_success());
    assert!(h.get::<Note>(&id).is_none());
    assert!(h.record(&id).is_none());
    assert_eq!(h.engine.stats().records_deleted, 1);
}

#[tokio::test]
async fn failed_file_delete_keeps_going_and_retries_the_rest() {
    let h = TestHarness::new();
    let id = Note::id_of("n1");
    h.put(
        &Note::new("n1", "Hello")
            .with_attachment(Bytes::from_static(b"attachment"))
            .with_cover(Bytes::from_static(b"cover")),
    );
    assert!(h.sync().await.is_success());
    assert_eq!(h.service.file_count(), 2);

    h.delete(&id);
    h.service.reset_calls();
    h.service
        .fail_next(Operation::DeleteFile, ServiceError::transport("connection reset"));
    let outcome = h.sync().await;
    let Some(Err(error)) = outcome.report().result(&id) else {
        panic!("expected a failure for {id}");
    };
    let failed = error.failed_files();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].slot, "attachment");
    assert_eq!(h.service.calls(Operation::DeleteFile), 2);
    assert_eq!(h.service.calls(Operation::DeleteRecord), 0);
    assert_eq!(h.service.file_count(), 1);
    assert_eq!(h.service.record_count(), 1);

    let remaining: Vec<String> = h
        .record(&id)
        .unwrap()
        .local
        .unwrap()
        .remote_files
        .into_keys()
        .collect();
    assert_eq!(remaining, vec!["attachment".to_string()]);

    h.service.reset_calls();
    let outcome = h.sync().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.report().result(&id), Some(&Ok(Stage::Delete)));
    assert_eq!(h.service.calls(Operation::DeleteFile), 1);
    assert_eq!(h.service.record_count(), 0);
    assert_eq!(h.service.file_count(), 0);
    assert!(h.record(&id).is_none());
}

// ============================================================================
// Relationships and locking
// ============================================================================

#[tokio::test]
async fn record_is_unlocked_once_its_target_is_uploaded() {
    let h = TestHarness::new();
    let id = Note::id_of("n1");
    h.put(&Folder::new("f1", "Inbox"));
    h.put(&Note::new("n1", "Hello").in_folder("f1"));

    let outcome = h.sync().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.report().result(&id), Some(&Ok(Stage::UpdateMetadata)));
    assert_eq!(h.service.calls(Operation::UpdateMetadata), 1);

    let record = h.record(&id).unwrap();
    assert!(record.lock_flags.is_empty());
    let remote = record.remote.as_ref().unwrap();
    assert!(!remote.is_locked);
    assert!(record.local.as_ref().unwrap().is_at(&remote.version));
    assert!(!h.service.remote_record(&id).unwrap().is_locked);
    assert!(!h.service.remote_metadata(&id).unwrap().locked);
    assert_eq!(h.engine.stats().records_unlocked, 1);
}

#[tokio::test]
async fn unresolved_target_keeps_record_locked() {
    let h = TestHarness::new();
    let folder = Folder::id_of("f1");
    let note = Note::id_of("n1");
    h.put(&Folder::new("f1", "Inbox"));
    h.put(&Note::new("n1", "Hello").in_folder("f1"));
    h.engine.record_local_changes().await.unwrap();
    h.engine.set_syncing_enabled(&folder, false).await.unwrap();

    let outcome = h.sync().await;
    assert!(!outcome.is_success());
    assert!(matches!(
        outcome.report().result(&note),
        Some(Err(RecordError::UnresolvedRelationship { .. }))
    ));
    let record = h.record(&note).unwrap();
    assert!(record.lock_flags.contains(LockFlags::LOCKED));
    assert!(!record.lock_flags.contains(LockFlags::UNLOCK_PENDING));
    assert_eq!(record.local_status(), Some(RecordStatus::Updated));
    assert!(h.service.remote_record(&note).unwrap().is_locked);

    // A locked record with no unlocked revision cannot be read elsewhere.
    let other = h.device();
    let outcome = other.sync().await;
    assert_eq!(outcome.report().result(&note), Some(&Err(RecordError::Locked)));
    assert!(other.get::<Note>(&note).is_none());

    h.engine.set_syncing_enabled(&folder, true).await.unwrap();
    let outcome = h.sync().await;
    assert!(outcome.is_success());
    assert!(!h.service.remote_record(&note).unwrap().is_locked);

    assert!(other.sync().await.is_success());
    assert_eq!(
        other.get::<Note>(&note).and_then(|n| n.folder),
        Some("f1".to_string())
    );
}

#[tokio::test]
async fn remote_edit_after_failed_unlock_is_downloaded() {
    let h = TestHarness::new();
    let note = Note::id_of("n1");
    h.put(&Folder::new("f1", "Inbox"));
    h.put(&Note::new("n1", "Hello").in_folder("f1"));
    h.service
        .fail_next(Operation::UpdateMetadata, ServiceError::transport("connection reset"));

    let outcome = h.sync().await;
    assert!(matches!(
        outcome.report().result(&note),
        Some(Err(RecordError::Service(_)))
    ));
    let record = h.record(&note).unwrap();
    assert!(record
        .lock_flags
        .contains(LockFlags::LOCKED | LockFlags::UNLOCK_PENDING));

    // Another device replaces the locked revision before the retry.
    h.service
        .put_remote(
            &Note::new("n1", "Remote edit").in_folder("f1").to_object(),
            &Note::schema(),
        )
        .unwrap();
    h.service.reset_calls();

    let outcome = h.sync().await;
    assert!(outcome.is_success());
    assert_eq!(h.service.calls(Operation::UpdateMetadata), 0);
    let local = h.get::<Note>(&note).unwrap();
    assert_eq!(local.title, "Remote edit");
    assert_eq!(local.folder, Some("f1".to_string()));

    let record = h.record(&note).unwrap();
    assert_eq!(record.lock_flags, LockFlags::NONE);
    assert_eq!(
        statuses(&h, &note),
        (Some(RecordStatus::Normal), Some(RecordStatus::Normal))
    );
    assert!(record
        .local
        .unwrap()
        .is_at(&h.service.remote_record(&note).unwrap().version));
    assert_eq!(
        h.service.remote_metadata(&note).unwrap().fields["title"].as_text(),
        Some("Remote edit")
    );
}

#[tokio::test]
async fn locked_record_is_read_at_its_last_unlocked_revision() {
    let a = TestHarness::new();
    let note = Note::id_of("n1");
    let folder = Folder::id_of("f2");
    a.put(&Note::new("n1", "Hello"));
    assert!(a.sync().await.is_success());

    a.put(&Folder::new("f2", "Archive"));
    a.put(&Note::new("n1", "Moved").in_folder("f2"));
    a.engine.record_local_changes().await.unwrap();
    a.engine.set_syncing_enabled(&folder, false).await.unwrap();
    assert!(!a.sync().await.is_success());
    let remote = a.service.remote_record(&note).unwrap();
    assert!(remote.is_locked);
    assert!(remote.previous_unlocked_version.is_some());

    let b = a.device();
    let outcome = b.sync().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.report().result(&note), Some(&Ok(Stage::Download)));
    let seen = b.get::<Note>(&note).unwrap();
    assert_eq!(seen.title, "Hello");
    assert_eq!(seen.folder, None);
    assert!(b.get::<Folder>(&folder).is_none());

    a.engine.set_syncing_enabled(&folder, true).await.unwrap();
    assert!(a.sync().await.is_success());
    assert!(!a.service.remote_record(&note).unwrap().is_locked);

    assert!(b.sync().await.is_success());
    let seen = b.get::<Note>(&note).unwrap();
    assert_eq!(seen.title, "Moved");
    assert_eq!(seen.folder, Some("f2".to_string()));
    assert_eq!(b.get::<Folder>(&folder).unwrap().name, "Archive");
}

// ============================================================================
// Conflicts
// ============================================================================

async fn diverged(a: &TestHarness, b: &TestHarness, a_title: &str, b_title: &str) {
    a.put(&Note::new("n1", "Hello"));
    assert!(a.sync().await.is_success());
    assert!(b.sync().await.is_success());
    a.put(&Note::new("n1", a_title));
    assert!(a.sync().await.is_success());
    b.put(&Note::new("n1", b_title));
}

#[tokio::test]
async fn concurrent_edits_are_flagged_and_excluded() {
    let a = TestHarness::new();
    let b = a.device();
    let id = Note::id_of("n1");
    diverged(&a, &b, "From A", "From B").await;

    b.service.reset_calls();
    let outcome = b.sync().await;
    assert!(outcome.error().is_none());
    assert!(!outcome.is_success());
    assert_eq!(outcome.report().result(&id), Some(&Err(RecordError::Conflicted)));
    assert_eq!(outcome.report().conflicts_flagged, 1);
    assert_eq!(b.service.calls(Operation::UploadRecord), 0);

    let record = b.record(&id).unwrap();
    assert!(record.is_conflicted);
    assert_eq!(b.get::<Note>(&id).unwrap().title, "From B");
    assert_eq!(
        b.service.remote_metadata(&id).unwrap().fields["title"].as_text(),
        Some("From A")
    );
}

#[tokio::test]
async fn identical_concurrent_edits_clear_the_conflict() {
    let a = TestHarness::new();
    let b = a.device();
    let id = Note::id_of("n1");
    diverged(&a, &b, "Same", "Same").await;

    let outcome = b.sync().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.report().conflicts_verified, 1);
    assert_eq!(outcome.report().result(&id), Some(&Ok(Stage::VerifyConflicts)));

    let record = b.record(&id).unwrap();
    assert!(!record.is_conflicted);
    assert_eq!(
        statuses(&b, &id),
        (Some(RecordStatus::Normal), Some(RecordStatus::Normal))
    );
}

#[tokio::test]
async fn manual_resolution_transfers_the_chosen_side() {
    let a = TestHarness::new();
    let b = a.device();
    let id = Note::id_of("n1");
    diverged(&a, &b, "From A", "From B").await;
    b.sync().await;

    assert!(!b
        .engine
        .resolve_conflict(&id, ConflictDecision::Flag)
        .await
        .unwrap());
    assert!(b
        .engine
        .resolve_conflict(&id, ConflictDecision::Download)
        .await
        .unwrap());
    assert!(!b
        .engine
        .resolve_conflict(&id, ConflictDecision::Upload)
        .await
        .unwrap());

    let outcome = b.sync().await;
    assert!(outcome.is_success());
    assert_eq!(b.get::<Note>(&id).unwrap().title, "From A");
    assert!(!b.record(&id).unwrap().is_conflicted);
}

#[tokio::test]
async fn newest_policy_prefers_the_later_edit() {
    let past = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let registry =
        registry_with_note(Note::schema().with_conflict_policy(ConflictPolicy::Newest));

    // Remote versions dated 2020 lose against local edits made now.
    let a = TestHarness::with_service(
        Arc::new(recsync_engine::MemoryService::with_clock(past)),
        registry.clone(),
        test_config(),
    );
    let b = a.device();
    let id = Note::id_of("n1");
    diverged(&a, &b, "From A", "From B").await;
    let outcome = b.sync().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.report().result(&id), Some(&Ok(Stage::Upload)));
    assert_eq!(
        b.service.remote_metadata(&id).unwrap().fields["title"].as_text(),
        Some("From B")
    );

    // Remote versions dated 2100 win.
    let future = Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap();
    let a = TestHarness::with_service(
        Arc::new(recsync_engine::MemoryService::with_clock(future)),
        registry,
        test_config(),
    );
    let b = a.device();
    diverged(&a, &b, "From A", "From B").await;
    let outcome = b.sync().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.report().result(&id), Some(&Ok(Stage::Download)));
    assert_eq!(b.get::<Note>(&id).unwrap().title, "From A");
}

// ============================================================================
// Duplicate files
// ============================================================================

#[tokio::test]
async fn duplicate_files_resolve_to_the_newest_confirmed_one() {
    let a = TestHarness::new();
    let id = Note::id_of("n1");
    a.put(&Note::new("n1", "Hello").with_attachment(Bytes::from_static(b"first")));
    assert!(a.sync().await.is_success());
    a.service
        .add_duplicate_file(&id, "attachment", Bytes::from_static(b"second"), true)
        .unwrap();
    a.service
        .add_duplicate_file(&id, "attachment", Bytes::from_static(b"third"), false)
        .unwrap();
    assert_eq!(a.service.remote_metadata(&id).unwrap().files.len(), 3);

    let b = a.device();
    a.service.reset_calls();
    assert!(b.sync().await.is_success());
    assert_eq!(a.service.calls(Operation::FileHistory), 3);
    assert_eq!(a.service.calls(Operation::DownloadFile), 1);
    assert_eq!(
        b.get::<Note>(&id).unwrap().attachment,
        Some(Bytes::from_static(b"second"))
    );
    assert_eq!(b.record(&id).unwrap().local.unwrap().remote_files.len(), 1);
}

#[tokio::test]
async fn vanished_duplicate_is_ignored() {
    let a = TestHarness::new();
    let id = Note::id_of("n1");
    a.put(&Note::new("n1", "Hello").with_attachment(Bytes::from_static(b"first")));
    assert!(a.sync().await.is_success());
    let newer = a
        .service
        .add_duplicate_file(&id, "attachment", Bytes::from_static(b"second"), true)
        .unwrap();
    assert!(a.service.remove_file(&newer.remote_identifier));

    let b = a.device();
    let outcome = b.sync().await;
    assert!(outcome.is_success());
    assert_eq!(outcome.report().result(&id), Some(&Ok(Stage::Download)));
    assert_eq!(
        b.get::<Note>(&id).unwrap().attachment,
        Some(Bytes::from_static(b"first"))
    );
}

#[tokio::test]
async fn slot_with_every_duplicate_gone_fails_the_record() {
    let a = TestHarness::new();
    let id = Note::id_of("n1");
    a.put(
        &Note::new("n1", "Hello")
            .with_attachment(Bytes::from_static(b"first"))
            .with_cover(Bytes::from_static(b"cover")),
    );
    assert!(a.sync().await.is_success());
    a.service
        .add_duplicate_file(&id, "attachment", Bytes::from_static(b"second"), true)
        .unwrap();
    for file in a.service.remote_metadata(&id).unwrap().files {
        if file.identifier == "attachment" {
            assert!(a.service.remove_file(&file.remote_identifier));
        }
    }

    let b = a.device();
    let outcome = b.sync().await;
    assert!(!outcome.is_success());
    let Some(Err(error)) = outcome.report().result(&id) else {
        panic!("expected a failure for {id}");
    };
    let failed = error.failed_files();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].slot, "attachment");
    assert_eq!(failed[0].kind, FileErrorKind::DoesNotExist);
    assert!(b.get::<Note>(&id).is_none());
    assert_eq!(b.store.cached_file_count(), 1);
}

// ============================================================================
// Partial failures and retries
// ============================================================================

#[tokio::test]
async fn failed_file_keeps_the_uploaded_ones() {
    let h = TestHarness::new();
    let id = Note::id_of("n1");
    h.put(
        &Note::new("n1", "Hello")
            .with_attachment(Bytes::from_static(b"attachment"))
            .with_cover(Bytes::from_static(b"cover")),
    );
    h.service.fail_file_slot("cover");

    let outcome = h.sync().await;
    let Some(Err(error)) = outcome.report().result(&id) else {
        panic!("expected a failure for {id}");
    };
    let failed = error.failed_files();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].slot, "cover");
    assert_eq!(failed[0].kind, FileErrorKind::Other);

    let record = h.record(&id).unwrap();
    assert!(record.remote.is_none());
    let local = record.local.unwrap();
    assert_eq!(local.status, RecordStatus::Updated);
    assert!(local.remote_files.contains_key("attachment"));

    h.service.clear_failures();
    h.service.reset_calls();
    assert!(h.sync().await.is_success());
    assert_eq!(h.service.calls(Operation::UploadFile), 1);
    assert_eq!(h.service.remote_metadata(&id).unwrap().files.len(), 2);
}

#[tokio::test]
async fn rate_limited_calls_are_retried() {
    let config = SyncConfig::default().with_retry(RetryConfig::new(
        Duration::from_millis(1),
        Duration::from_millis(50),
    ));
    let h = TestHarness::with_service(
        Arc::new(recsync_engine::MemoryService::new()),
        sample_registry(),
        config,
    );
    h.put(&Note::new("n1", "Hello"));
    h.service
        .fail_next(Operation::UploadRecord, ServiceError::RateLimited);

    assert!(h.sync().await.is_success());
    assert_eq!(h.service.calls(Operation::UploadRecord), 2);
    assert_eq!(h.engine.stats().retries, 1);
}

#[tokio::test]
async fn exhausted_retries_fail_only_the_record() {
    let h = TestHarness::new();
    let id = Note::id_of("n1");
    h.put(&Note::new("n1", "Hello"));
    h.put(&Note::new("n2", "World"));
    h.service
        .fail_next(Operation::UploadRecord, ServiceError::RateLimited);

    let outcome = h.sync().await;
    assert!(outcome.error().is_none());
    assert_eq!(outcome.report().failure_count(), 1);
    assert_eq!(h.service.record_count(), 1);

    assert!(h.sync().await.is_success());
    assert_eq!(h.service.record_count(), 2);
    assert_eq!(
        statuses(&h, &id),
        (Some(RecordStatus::Normal), Some(RecordStatus::Normal))
    );
}

#[tokio::test]
async fn expired_authentication_is_renewed() {
    let h = TestHarness::new();
    h.put(&Note::new("n1", "Hello"));
    h.service.expire_auth();
    assert!(h.sync().await.is_success());
    assert_eq!(h.service.calls(Operation::Authenticate), 1);

    h.service.expire_auth();
    h.service.set_reauth_fails(true);
    let outcome = h.sync().await;
    assert!(matches!(outcome.error(), Some(SyncError::Authentication(_))));
    assert_eq!(h.engine.state(), SyncState::Failed);
    assert!(h.engine.stats().last_error.is_some());
}

#[tokio::test]
async fn rejected_token_falls_back_to_full_fetch() {
    let h = TestHarness::new();
    h.put(&Note::new("n1", "Hello"));
    assert!(h.sync().await.is_success());
    assert!(!h.sync().await.report().full_fetch);

    h.service.invalidate_tokens();
    h.service.reset_calls();
    let outcome = h.sync().await;
    assert!(outcome.is_success());
    assert!(outcome.report().full_fetch);
    assert_eq!(h.service.calls(Operation::FetchChanges), 1);
    assert_eq!(h.service.calls(Operation::FetchAll), 1);

    h.service.reset_calls();
    assert!(!h.sync().await.report().full_fetch);
    assert_eq!(h.service.calls(Operation::FetchAll), 0);
    assert_eq!(h.engine.stats().full_fetches, 2);
}

// ============================================================================
// Engine control
// ============================================================================

#[tokio::test]
async fn cancellation_aborts_the_running_stage() {
    let config = SyncConfig::default().with_retry(RetryConfig::new(
        Duration::from_secs(60),
        Duration::from_secs(120),
    ));
    let h = TestHarness::with_service(
        Arc::new(recsync_engine::MemoryService::new()),
        sample_registry(),
        config,
    );
    let id = Note::id_of("n1");
    h.put(&Note::new("n1", "Hello"));
    h.service
        .fail_next(Operation::UploadRecord, ServiceError::RateLimited);

    let mut progress = h.engine.subscribe_progress();
    let (outcome, _) = tokio::join!(h.engine.sync(), async {
        progress
            .wait_for(|progress| progress.stage == Stage::Upload)
            .await
            .map(|_| ())
            .unwrap();
        assert!(matches!(h.engine.sync().await, Err(SyncError::AlreadyRunning)));
        assert!(matches!(
            h.engine.record_local_changes().await,
            Err(SyncError::AlreadyRunning)
        ));
        h.engine.cancel();
    });

    let outcome = outcome.unwrap();
    assert!(matches!(outcome.error(), Some(SyncError::Cancelled)));
    assert_eq!(outcome.report().result(&id), Some(&Err(RecordError::Cancelled)));
    assert_eq!(h.engine.state(), SyncState::Failed);
    assert_eq!(h.engine.stats().cycles_failed, 1);
    assert_eq!(h.service.record_count(), 0);
    assert_eq!(statuses(&h, &id), (Some(RecordStatus::Updated), None));

    assert!(h.sync().await.is_success());
    assert_eq!(h.service.record_count(), 1);
}

#[tokio::test]
async fn corrupted_store_aborts_and_keeps_pending_changes() {
    let h = TestHarness::new();
    h.put(&Note::new("n1", "Hello"));
    h.store.set_corrupted(true);

    let outcome = h.sync().await;
    let error = outcome.error().expect("run aborts");
    assert!(error.is_fatal());
    assert_eq!(h.engine.pending_local_changes(), 1);
    assert_eq!(h.service.calls(Operation::FetchAll), 0);

    h.store.set_corrupted(false);
    assert!(h.sync().await.is_success());
    assert_eq!(h.service.record_count(), 1);
}

#[tokio::test]
async fn disabled_records_are_skipped() {
    let h = TestHarness::new();
    let id = Note::id_of("n1");
    h.put(&Note::new("n1", "Hello"));
    let seeded = h.engine.record_local_changes().await.unwrap();
    assert_eq!(seeded.created, 1);
    h.engine.set_syncing_enabled(&id, false).await.unwrap();

    let outcome = h.sync().await;
    assert!(outcome.is_success());
    assert_eq!(h.service.record_count(), 0);

    h.engine.set_syncing_enabled(&id, true).await.unwrap();
    assert!(h.sync().await.is_success());
    assert_eq!(h.service.record_count(), 1);
}

#[tokio::test]
async fn record_disabled_while_queued_is_reported() {
    let h = TestHarness::with_service(
        Arc::new(recsync_engine::MemoryService::new()),
        sample_registry(),
        test_config().with_batch_concurrency(1),
    );
    let first = Note::id_of("n1");
    let second = Note::id_of("n2");
    h.put(&Note::new("n1", "First"));
    h.put(&Note::new("n2", "Second"));

    let store = Arc::clone(&h.store);
    let queued = second.clone();
    h.service.on_next_call(Operation::UploadRecord, move || {
        set_syncing_in_store(&store, &queued, false);
    });

    let outcome = h.sync().await;
    assert_eq!(outcome.report().result(&first), Some(&Ok(Stage::Upload)));
    assert_eq!(
        outcome.report().result(&second),
        Some(&Err(RecordError::SyncingDisabled))
    );
    assert_eq!(h.service.calls(Operation::UploadRecord), 1);
    assert_eq!(h.service.record_count(), 1);
    assert!(!h.record(&second).unwrap().is_syncing_enabled);

    h.engine.set_syncing_enabled(&second, true).await.unwrap();
    assert!(h.sync().await.is_success());
    assert_eq!(h.service.record_count(), 2);
}

#[tokio::test]
async fn schema_default_disables_new_records() {
    let registry = registry_with_note(Note::schema().with_syncing_enabled(false));
    let h = TestHarness::with_service(
        Arc::new(recsync_engine::MemoryService::new()),
        registry,
        test_config(),
    );
    h.put(&Note::new("n1", "Hello"));
    assert!(h.sync().await.is_success());
    assert_eq!(h.service.record_count(), 0);
    assert!(!h.record(&Note::id_of("n1")).unwrap().is_syncing_enabled);
}

#[tokio::test]
async fn invalid_objects_are_reported_without_aborting() {
    let h = TestHarness::new();
    let bad = Note::id_of("bad");
    h.store
        .put_object(
            SyncObject::new(bad.clone())
                .with_field("id", "other")
                .with_field("title", "Mismatched key"),
        )
        .unwrap();
    h.put(&Note::new("", "No identifier"));
    h.put(&Note::new("n2", "Fine"));

    let outcome = h.sync().await;
    assert!(outcome.error().is_none());
    assert_eq!(outcome.report().failure_count(), 1);
    assert!(matches!(
        outcome.report().result(&bad),
        Some(Err(RecordError::Model(_)))
    ));
    assert!(h.record(&bad).is_none());
    assert_eq!(h.service.record_count(), 1);
}
