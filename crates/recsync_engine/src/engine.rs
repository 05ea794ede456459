//! The sync engine façade.

use crate::call::ServiceCaller;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::pipeline::SyncPipeline;
use crate::report::SyncOutcome;
use crate::service::Service;
use crate::state::{Stage, SyncProgress, SyncState, SyncStats};
use crate::tracker::{ChangeTracker, SeedOutcome};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use recsync_model::{ConflictDecision, ManagedRecord, RecordId, SchemaRegistry};
use recsync_store::{CommitOrigin, ObjectStore, StoreError};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Synchronizes an object store with a remote service.
///
/// The engine observes local commits from the moment it is created. Runs
/// are serialized: a `sync` call made while another is in flight fails
/// with [`SyncError::AlreadyRunning`].
pub struct SyncEngine {
    config: SyncConfig,
    registry: SchemaRegistry,
    store: Arc<dyn ObjectStore>,
    service: Arc<dyn Service>,
    tracker: ChangeTracker,
    running: tokio::sync::Mutex<()>,
    cancel: Mutex<CancellationToken>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    progress: watch::Sender<SyncProgress>,
}

impl SyncEngine {
    /// Creates an engine and starts tracking local commits on `store`.
    pub fn new(
        config: SyncConfig,
        registry: SchemaRegistry,
        store: Arc<dyn ObjectStore>,
        service: Arc<dyn Service>,
    ) -> Self {
        let tracker = ChangeTracker::attach(store.as_ref());
        let (progress, _) = watch::channel(SyncProgress::default());
        Self {
            config,
            registry,
            store,
            service,
            tracker,
            running: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(CancellationToken::new()),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            progress,
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The registered record types.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// The current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Statistics accumulated across runs.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Subscribes to stage progress of runs.
    pub fn subscribe_progress(&self) -> watch::Receiver<SyncProgress> {
        self.progress.subscribe()
    }

    /// Number of local commits not yet seeded.
    pub fn pending_local_changes(&self) -> usize {
        self.tracker.pending_events()
    }

    /// Cancels the run in flight, if any.
    ///
    /// In-flight remote calls and backoff timers are dropped and the
    /// running stage's writes are discarded.
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// Runs the pipeline once.
    ///
    /// Returns `Err` only if another run is in flight. Aborted runs are
    /// reported as [`SyncOutcome::Failed`] with the results collected so
    /// far.
    pub async fn sync(&self) -> SyncResult<SyncOutcome> {
        let Ok(_running) = self.running.try_lock() else {
            return Err(SyncError::AlreadyRunning);
        };

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();
        let caller = ServiceCaller::new(
            Arc::clone(&self.service),
            self.config.retry.clone(),
            cancel.clone(),
        );

        *self.state.write() = SyncState::Running(Stage::Seed);
        let pipeline = SyncPipeline {
            store: self.store.as_ref(),
            registry: &self.registry,
            tracker: &self.tracker,
            config: &self.config,
            caller: &caller,
            cancel: &cancel,
            progress: &self.progress,
            state: &self.state,
        };
        let outcome = pipeline.run().await;
        self.finish(&outcome, caller.retries());
        Ok(outcome)
    }

    fn finish(&self, outcome: &SyncOutcome, retries: u64) {
        let report = outcome.report();
        let succeeded =
            |stage: Stage| report.stage(stage).map_or(0, |summary| summary.succeeded) as u64;

        let mut stats = self.stats.write();
        stats.records_uploaded += succeeded(Stage::Upload);
        stats.records_unlocked += succeeded(Stage::UpdateMetadata);
        stats.records_downloaded += succeeded(Stage::Download);
        stats.records_deleted += succeeded(Stage::Delete);
        stats.records_failed += report.failure_count() as u64;
        stats.conflicts_flagged += report.conflicts_flagged as u64;
        stats.conflicts_verified += report.conflicts_verified as u64;
        stats.full_fetches += u64::from(report.full_fetch);
        stats.retries += retries;

        match outcome.error() {
            Some(error) => {
                warn!(error = %error, failed = report.failure_count(), "sync run aborted");
                stats.cycles_failed += 1;
                stats.last_error = Some(error.to_string());
                *self.state.write() = SyncState::Failed;
            }
            None => {
                info!(
                    failed = report.failure_count(),
                    records = report.results.len(),
                    "sync run finished"
                );
                stats.cycles_completed += 1;
                stats.last_sync_time = Some(Utc::now());
                stats.last_error = None;
                *self.state.write() = SyncState::Synced;
            }
        }
    }

    /// Seeds pending local commits without running a sync.
    pub async fn record_local_changes(&self) -> SyncResult<SeedOutcome> {
        let Ok(_running) = self.running.try_lock() else {
            return Err(SyncError::AlreadyRunning);
        };
        self.tracker.seed(self.store.as_ref(), &self.registry)
    }

    /// Resolves a conflicted record by hand.
    ///
    /// `Upload` keeps the local copy and `Download` the remote one; the
    /// next run transfers it. `Flag` leaves the record conflicted. Returns
    /// false if the record was not conflicted.
    pub async fn resolve_conflict(
        &self,
        id: &RecordId,
        decision: ConflictDecision,
    ) -> SyncResult<bool> {
        let Ok(_running) = self.running.try_lock() else {
            return Err(SyncError::AlreadyRunning);
        };
        let mut record = self.require_record(id)?;
        if !record.is_conflicted || decision == ConflictDecision::Flag {
            return Ok(false);
        }
        record.apply_decision(decision);
        self.put_record(record)?;
        info!(record = %id, decision = %decision, "conflict resolved manually");
        Ok(true)
    }

    /// Includes a record in, or excludes it from, every stage.
    pub async fn set_syncing_enabled(&self, id: &RecordId, enabled: bool) -> SyncResult<()> {
        let Ok(_running) = self.running.try_lock() else {
            return Err(SyncError::AlreadyRunning);
        };
        let mut record = self.require_record(id)?;
        if record.is_syncing_enabled != enabled {
            record.is_syncing_enabled = enabled;
            self.put_record(record)?;
        }
        Ok(())
    }

    /// The managed record for `id`.
    pub fn record(&self, id: &RecordId) -> SyncResult<Option<ManagedRecord>> {
        Ok(self.store.record(id)?)
    }

    fn require_record(&self, id: &RecordId) -> SyncResult<ManagedRecord> {
        self.store
            .record(id)?
            .ok_or_else(|| SyncError::Database(StoreError::NotFound { id: id.clone() }))
    }

    fn put_record(&self, record: ManagedRecord) -> SyncResult<()> {
        let mut txn = self.store.begin()?;
        txn.put_record(record);
        self.store.commit(txn, CommitOrigin::Sync)?;
        Ok(())
    }
}
