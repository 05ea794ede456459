//! Per-record results of a sync run.

use crate::error::{RecordError, RecordResult, SyncError};
use crate::state::Stage;
use recsync_model::RecordId;
use std::collections::BTreeMap;

/// Candidate and result counts of one executed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSummary {
    /// The stage.
    pub stage: Stage,
    /// Records selected for the stage.
    pub candidates: usize,
    /// Records that succeeded.
    pub succeeded: usize,
    /// Records that failed.
    pub failed: usize,
}

/// Results collected over a run.
///
/// Each record maps to the last stage it succeeded in or to its first
/// failure; a later success never hides a failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Result per record.
    pub results: BTreeMap<RecordId, RecordResult<Stage>>,
    /// Summaries of the executed stages, in order.
    pub stages: Vec<StageSummary>,
    /// Whether the remote fetch was a full one.
    pub full_fetch: bool,
    /// Records flagged conflicted by their type's policy.
    pub conflicts_flagged: usize,
    /// Conflicts cleared because both sides hashed equal.
    pub conflicts_verified: usize,
}

impl SyncReport {
    /// Records a success.
    pub fn succeed(&mut self, id: RecordId, stage: Stage) {
        match self.results.get(&id) {
            Some(Err(_)) => {}
            _ => {
                self.results.insert(id, Ok(stage));
            }
        }
    }

    /// Records a failure, replacing an earlier success.
    pub fn fail(&mut self, id: RecordId, error: RecordError) {
        match self.results.get(&id) {
            Some(Err(_)) => {}
            _ => {
                self.results.insert(id, Err(error));
            }
        }
    }

    /// Records a failure regardless of earlier results.
    pub(crate) fn force_fail(&mut self, id: RecordId, error: RecordError) {
        self.results.insert(id, Err(error));
    }

    /// Result for one record.
    pub fn result(&self, id: &RecordId) -> Option<&RecordResult<Stage>> {
        self.results.get(id)
    }

    /// Failed records.
    pub fn failures(&self) -> impl Iterator<Item = (&RecordId, &RecordError)> {
        self.results
            .iter()
            .filter_map(|(id, result)| result.as_ref().err().map(|err| (id, err)))
    }

    /// Number of failed records.
    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Returns true if some record failed.
    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Summary of a stage, if it ran.
    pub fn stage(&self, stage: Stage) -> Option<&StageSummary> {
        self.stages.iter().find(|summary| summary.stage == stage)
    }

    /// Records that succeeded in `stage` and were not touched afterwards.
    pub fn succeeded_in(&self, stage: Stage) -> usize {
        self.results
            .values()
            .filter(|result| matches!(result, Ok(done) if *done == stage))
            .count()
    }
}

/// Outcome of a sync run.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Every stage ran and no record failed.
    Success(SyncReport),
    /// Every stage ran but some records failed.
    Partial(SyncReport),
    /// A stage aborted the run; the report holds everything collected.
    Failed {
        /// The aborting error.
        error: SyncError,
        /// Results collected before and during the aborted stage.
        report: SyncReport,
    },
}

impl SyncOutcome {
    /// The collected report.
    pub fn report(&self) -> &SyncReport {
        match self {
            SyncOutcome::Success(report) | SyncOutcome::Partial(report) => report,
            SyncOutcome::Failed { report, .. } => report,
        }
    }

    /// Returns true if the run completed with no failure.
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success(_))
    }

    /// The aborting error, if the run failed.
    pub fn error(&self) -> Option<&SyncError> {
        match self {
            SyncOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}
