//! Ledger trait and error types

use crate::storage::{DeadLetterRecord, RunCounts, RunRecord, RunStatus};
use crate::targets::Target;
use thiserror::Error;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for ledger operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistent record of runs and dead-lettered targets
pub trait Ledger {
    // ===== Run Management =====

    /// Starts a new run and returns its id
    ///
    /// Ids are never reused, even after the latest run is deleted.
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Marks an existing run as running again, creating the row if it is missing
    fn resume_run(&mut self, run_id: i64, config_hash: &str) -> StorageResult<()>;

    /// Gets a run by id
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// All runs, newest first
    fn list_runs(&self) -> StorageResult<Vec<RunRecord>>;

    /// Records the final status and counts of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus, counts: &RunCounts) -> StorageResult<()>;

    // ===== Dead Letters =====

    /// Records a target that was given up on
    fn record_dead_letter(&mut self, run_id: i64, target: &Target, reason: &str) -> StorageResult<()>;

    /// Dead letters of a run, oldest first
    fn dead_letters(&self, run_id: i64) -> StorageResult<Vec<DeadLetterRecord>>;
}
