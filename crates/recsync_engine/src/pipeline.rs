//! The staged sync pipeline.
//!
//! A run executes the stages in a fixed order. Each transfer stage selects
//! its candidates with a record predicate, runs the per-record operation
//! with bounded concurrency, and commits every result of the stage in one
//! transaction before the next stage starts.

use crate::call::ServiceCaller;
use crate::config::SyncConfig;
use crate::conflict;
use crate::error::{RecordError, SyncError, SyncResult};
use crate::report::{StageSummary, SyncOutcome, SyncReport};
use crate::state::{Stage, SyncProgress, SyncState};
use crate::tracker::{fetch_remote, ChangeTracker};
use crate::transfer::{
    delete, download, metadata, upload, RecordChanges, RecordFailure, TransferContext,
    TransferResult,
};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use recsync_model::{
    ConflictDecision, ManagedRecord, RecordId, RecordPredicate, SchemaRegistry, SyncAction,
};
use recsync_store::{CommitOrigin, ObjectStore};
use std::future::Future;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One run of the pipeline over borrowed engine state.
pub(crate) struct SyncPipeline<'a> {
    pub store: &'a dyn ObjectStore,
    pub registry: &'a SchemaRegistry,
    pub tracker: &'a ChangeTracker,
    pub config: &'a SyncConfig,
    pub caller: &'a ServiceCaller,
    pub cancel: &'a CancellationToken,
    pub progress: &'a watch::Sender<SyncProgress>,
    pub state: &'a RwLock<SyncState>,
}

impl SyncPipeline<'_> {
    /// Runs every stage and classifies the outcome.
    pub async fn run(&self) -> SyncOutcome {
        let mut report = SyncReport::default();
        match self.run_stages(&mut report).await {
            Ok(()) if report.has_failures() => SyncOutcome::Partial(report),
            Ok(()) => SyncOutcome::Success(report),
            Err(error) => SyncOutcome::Failed { error, report },
        }
    }

    async fn run_stages(&self, report: &mut SyncReport) -> SyncResult<()> {
        self.seed(report)?;
        self.fetch(report).await?;
        self.detect_conflicts(report)?;
        if self.config.verify_conflicts {
            self.verify_conflicts(report).await?;
        }
        self.upload(report).await?;
        self.unlock(report).await?;
        self.download(report).await?;
        self.delete(report).await?;
        self.sweep_conflicts(report)
    }

    fn context(&self) -> TransferContext<'_> {
        TransferContext {
            store: self.store,
            registry: self.registry,
            caller: self.caller,
        }
    }

    fn enter(&self, stage: Stage, total: usize) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        *self.state.write() = SyncState::Running(stage);
        self.progress.send_replace(SyncProgress::start(stage, total));
        info!(stage = %stage, candidates = total, "stage started");
        Ok(())
    }

    fn candidates(&self, predicate: &RecordPredicate) -> SyncResult<Vec<ManagedRecord>> {
        Ok(self.store.fetch_records(predicate)?)
    }

    fn seed(&self, report: &mut SyncReport) -> SyncResult<()> {
        self.enter(Stage::Seed, self.tracker.pending_events())?;
        let outcome = self.tracker.seed(self.store, self.registry)?;
        let failed = outcome.rejected.len();
        for (id, error) in outcome.rejected {
            report.fail(id, error);
        }
        report.stages.push(StageSummary {
            stage: Stage::Seed,
            candidates: outcome.created + outcome.updated + outcome.deleted + failed,
            succeeded: outcome.created + outcome.updated + outcome.deleted,
            failed,
        });
        Ok(())
    }

    async fn fetch(&self, report: &mut SyncReport) -> SyncResult<()> {
        self.enter(Stage::FetchChanges, 1)?;
        let outcome = fetch_remote(self.store, self.registry, self.caller).await?;
        report.full_fetch = outcome.full;
        report.stages.push(StageSummary {
            stage: Stage::FetchChanges,
            candidates: outcome.updated + outcome.deleted,
            succeeded: outcome.updated + outcome.deleted,
            failed: 0,
        });
        Ok(())
    }

    fn detect_conflicts(&self, report: &mut SyncReport) -> SyncResult<()> {
        let candidates = self.candidates(&RecordPredicate::for_action(SyncAction::Conflict))?;
        self.enter(Stage::DetectConflicts, candidates.len())?;

        let mut results = Vec::with_capacity(candidates.len());
        for record in candidates {
            let id = record.id.clone();
            let result = match conflict::detect(self.store, self.registry, record) {
                Ok((decision, write)) => {
                    if decision == ConflictDecision::Flag {
                        report.conflicts_flagged += 1;
                    }
                    Ok(RecordChanges::new(vec![write]))
                }
                Err(err) => Err(RecordFailure::from(err)),
            };
            self.progress.send_modify(|progress| progress.completed += 1);
            results.push((id, result));
        }
        self.commit_stage(Stage::DetectConflicts, results, report)
    }

    async fn verify_conflicts(&self, report: &mut SyncReport) -> SyncResult<()> {
        let candidates = self.candidates(&RecordPredicate::conflicted())?;
        let ctx = self.context();
        let results = self
            .execute(Stage::VerifyConflicts, candidates, report, |record| {
                conflict::verify(&ctx, record)
            })
            .await?;

        let mut changes = Vec::with_capacity(results.len());
        for (id, result) in results {
            changes.push((
                id,
                result.map(|(cleared, changes)| {
                    if cleared {
                        report.conflicts_verified += 1;
                    }
                    changes
                }),
            ));
        }
        self.commit_stage(Stage::VerifyConflicts, changes, report)
    }

    async fn upload(&self, report: &mut SyncReport) -> SyncResult<()> {
        let candidates = self.candidates(&RecordPredicate::for_action(SyncAction::Upload))?;
        let ctx = self.context();
        let results = self
            .execute(Stage::Upload, candidates, report, |record| {
                upload::upload(&ctx, record)
            })
            .await?;
        self.commit_stage(Stage::Upload, results, report)
    }

    async fn unlock(&self, report: &mut SyncReport) -> SyncResult<()> {
        let candidates = self.candidates(&RecordPredicate::pending_unlock())?;
        let ctx = self.context();
        let results = self
            .execute(Stage::UpdateMetadata, candidates, report, |record| {
                metadata::unlock(&ctx, record)
            })
            .await?;
        self.commit_stage(Stage::UpdateMetadata, results, report)
    }

    async fn download(&self, report: &mut SyncReport) -> SyncResult<()> {
        let candidates = self.candidates(&RecordPredicate::for_action(SyncAction::Download))?;
        let ctx = self.context();
        let fetched = self
            .execute(Stage::Download, candidates, report, |record| {
                download::download(&ctx, record)
            })
            .await?;

        let mut results = Vec::with_capacity(fetched.len());
        let mut pending = Vec::new();
        for (id, result) in fetched {
            match result {
                Ok(item) => pending.push(item),
                Err(failure) => results.push((id, Err(failure))),
            }
        }
        results.extend(download::settle_downloads(self.store, self.registry, pending));
        self.commit_stage(Stage::Download, results, report)
    }

    async fn delete(&self, report: &mut SyncReport) -> SyncResult<()> {
        let candidates = self.candidates(&RecordPredicate::for_action(SyncAction::Delete))?;
        let ctx = self.context();
        let results = self
            .execute(Stage::Delete, candidates, report, |record| {
                delete::delete(&ctx, record)
            })
            .await?;
        self.commit_stage(Stage::Delete, results, report)
    }

    /// Records every conflicted record as a conflict failure.
    fn sweep_conflicts(&self, report: &mut SyncReport) -> SyncResult<()> {
        let conflicted = self.candidates(&RecordPredicate::conflicted())?;
        if !conflicted.is_empty() {
            info!(count = conflicted.len(), "records left conflicted");
        }
        for record in conflicted {
            report.force_fail(record.id, RecordError::Conflicted);
        }
        Ok(())
    }

    /// Runs `op` over the candidates with bounded concurrency.
    ///
    /// A candidate is re-read just before its turn; one whose syncing was
    /// disabled since the stage selected it fails with `SyncingDisabled`.
    /// Cancellation stops the stage at once: in-flight operations are
    /// dropped, every candidate fails with `Cancelled`, and the run aborts.
    async fn execute<T, F, Fut>(
        &self,
        stage: Stage,
        candidates: Vec<ManagedRecord>,
        report: &mut SyncReport,
        op: F,
    ) -> SyncResult<Vec<(RecordId, TransferResult<T>)>>
    where
        F: Fn(ManagedRecord) -> Fut,
        Fut: Future<Output = TransferResult<T>>,
    {
        self.enter(stage, candidates.len())?;
        let ids: Vec<RecordId> = candidates.iter().map(|record| record.id.clone()).collect();
        let mut results = Vec::with_capacity(candidates.len());

        let op = &op;
        let tasks = stream::iter(candidates.into_iter().map(|record| {
            let id = record.id.clone();
            let current = self.still_enabled(record);
            async move {
                let result = match current {
                    Ok(record) => op(record).await,
                    Err(failure) => Err(failure),
                };
                (id, result)
            }
        }))
        .buffer_unordered(self.config.batch_concurrency);
        let mut tasks = std::pin::pin!(tasks);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(stage = %stage, candidates = ids.len(), "stage cancelled");
                    for id in ids {
                        report.fail(id, RecordError::Cancelled);
                    }
                    return Err(SyncError::Cancelled);
                }
                next = tasks.next() => match next {
                    Some(result) => {
                        results.push(result);
                        self.progress.send_modify(|progress| progress.completed += 1);
                    }
                    None => break,
                }
            }
        }
        Ok(results)
    }

    fn still_enabled(&self, record: ManagedRecord) -> TransferResult<ManagedRecord> {
        match self.store.record(&record.id)? {
            Some(current) if !current.is_syncing_enabled => {
                debug!(record = %record.id, "syncing disabled while queued");
                Err(RecordError::SyncingDisabled.into())
            }
            _ => Ok(record),
        }
    }

    /// Commits the writes of a stage in one transaction and records the
    /// per-record results.
    ///
    /// Failed records contribute their salvage writes. If the commit fails,
    /// the records that had succeeded fail with `Aborted` and the run
    /// aborts.
    fn commit_stage(
        &self,
        stage: Stage,
        results: Vec<(RecordId, TransferResult<RecordChanges>)>,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut txn = match self.store.begin() {
            Ok(txn) => txn,
            Err(err) => {
                for (id, _) in results {
                    report.fail(
                        id,
                        RecordError::Aborted {
                            stage,
                            message: err.to_string(),
                        },
                    );
                }
                return Err(err.into());
            }
        };

        for (id, result) in results {
            match result {
                Ok(changes) => {
                    txn.extend(changes.writes);
                    succeeded.push(id);
                }
                Err(failure) => {
                    txn.extend(failure.salvage);
                    failed.push((id, failure.error));
                }
            }
        }

        let summary = StageSummary {
            stage,
            candidates: succeeded.len() + failed.len(),
            succeeded: succeeded.len(),
            failed: failed.len(),
        };

        if !txn.is_empty() {
            if let Err(err) = self.store.commit(txn, CommitOrigin::Sync) {
                warn!(stage = %stage, error = %err, "stage commit failed");
                for id in succeeded {
                    report.fail(
                        id,
                        RecordError::Aborted {
                            stage,
                            message: err.to_string(),
                        },
                    );
                }
                for (id, error) in failed {
                    report.fail(id, error);
                }
                return Err(err.into());
            }
        } else {
            debug!(stage = %stage, "nothing to commit");
        }

        for id in succeeded {
            report.succeed(id, stage);
        }
        for (id, error) in failed {
            warn!(stage = %stage, record = %id, error = %error, "record failed");
            report.fail(id, error);
        }
        info!(
            stage = %stage,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "stage finished"
        );
        report.stages.push(summary);
        Ok(())
    }
}
