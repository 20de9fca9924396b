//! Run ledger
//!
//! The ledger is a small SQLite database that outlives individual runs. It
//! hands out monotonic run ids and keeps:
//! - Run status, timestamps and configuration hash
//! - Final done/failed/pending/record counts
//! - A dead-letter log of every target given up on

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteLedger;
pub use traits::{Ledger, StorageError, StorageResult};

use std::path::Path;

/// Opens or creates the ledger at `path`
pub fn open_ledger(path: &Path) -> StorageResult<SqliteLedger> {
    SqliteLedger::open(path)
}

/// Represents a crawl run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub counts: RunCounts,
}

/// Final tallies of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub done: u64,
    pub failed: u64,
    pub pending: u64,
    pub records: u64,
}

/// A target that was given up on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRecord {
    pub run_id: i64,
    pub origin: String,
    pub destination: String,
    pub target_date: String,
    pub attempts: u32,
    pub reason: String,
    pub recorded_at: String,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Aborted,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Aborted => "aborted",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }
}
