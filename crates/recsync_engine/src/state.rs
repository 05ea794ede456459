//! Engine state machine, statistics and progress.

use chrono::{DateTime, Utc};
use std::fmt;

/// One stage of a sync run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Create and mark records from local store changes.
    Seed,
    /// Fetch remote changes.
    FetchChanges,
    /// Apply conflict policies.
    DetectConflicts,
    /// Re-check conflicted records by content hash.
    VerifyConflicts,
    /// Push local changes.
    Upload,
    /// Clear remote locks whose dependencies arrived.
    UpdateMetadata,
    /// Pull remote changes.
    Download,
    /// Propagate deletions.
    Delete,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 8] = [
        Stage::Seed,
        Stage::FetchChanges,
        Stage::DetectConflicts,
        Stage::VerifyConflicts,
        Stage::Upload,
        Stage::UpdateMetadata,
        Stage::Download,
        Stage::Delete,
    ];

    /// Returns the stage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Seed => "seed",
            Stage::FetchChanges => "fetch_changes",
            Stage::DetectConflicts => "detect_conflicts",
            Stage::VerifyConflicts => "verify_conflicts",
            Stage::Upload => "upload",
            Stage::UpdateMetadata => "update_metadata",
            Stage::Download => "download",
            Stage::Delete => "delete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No run has happened yet.
    Idle,
    /// A run is executing the given stage.
    Running(Stage),
    /// The last run finished, possibly with record failures.
    Synced,
    /// The last run aborted.
    Failed,
}

impl SyncState {
    /// Returns true if a run is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Running(_))
    }
}

/// Statistics accumulated across runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    /// Runs that reached the end of the pipeline.
    pub cycles_completed: u64,
    /// Runs that aborted.
    pub cycles_failed: u64,
    /// Records uploaded.
    pub records_uploaded: u64,
    /// Records downloaded.
    pub records_downloaded: u64,
    /// Records deleted.
    pub records_deleted: u64,
    /// Remote locks cleared.
    pub records_unlocked: u64,
    /// Record-level failures.
    pub records_failed: u64,
    /// Records flagged conflicted by a policy.
    pub conflicts_flagged: u64,
    /// Conflicts cleared by verification.
    pub conflicts_verified: u64,
    /// Full fetches, including those forced by a rejected token.
    pub full_fetches: u64,
    /// Rate-limit retries.
    pub retries: u64,
    /// Time the last run finished.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Error that aborted the last failed run.
    pub last_error: Option<String>,
}

/// Progress of the running stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    /// Stage being executed.
    pub stage: Stage,
    /// Candidates finished so far.
    pub completed: usize,
    /// Candidates selected for the stage.
    pub total: usize,
}

impl SyncProgress {
    /// Progress at the start of a stage.
    pub fn start(stage: Stage, total: usize) -> Self {
        Self {
            stage,
            completed: 0,
            total,
        }
    }

    /// Returns true if every candidate finished.
    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::start(Stage::Seed, 0)
    }
}
