//! End-of-run summary data

use crate::storage::{DeadLetterRecord, RunCounts, RunStatus};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Summary of one process's share of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: i64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config_hash: String,
    pub output_path: PathBuf,

    /// Queue totals at shutdown; `records` counts rows flushed by this process
    pub counts: RunCounts,

    /// Targets fetched this session whose page had no data cells
    pub zero_yield: u64,

    /// Failed attempts that were requeued this session
    pub retries: u64,

    pub dead_letters: Vec<DeadLetterRecord>,
}

impl RunSummary {
    pub fn duration_seconds(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds().max(0)
    }

    /// Number of targets known to the queue
    pub fn total_targets(&self) -> u64 {
        self.counts.done + self.counts.failed + self.counts.pending
    }

    /// Share of targets that are done, as a percentage
    pub fn completion_rate(&self) -> f64 {
        let total = self.total_targets();
        if total == 0 {
            return 0.0;
        }
        (self.counts.done as f64 / total as f64) * 100.0
    }
}

/// Prints the shutdown summary to stdout
pub fn print_summary(summary: &RunSummary) {
    println!("=== Run {} {} ===", summary.run_id, summary.status.to_db_string());
    println!("  Done:     {}", summary.counts.done);
    println!("  Failed:   {}", summary.counts.failed);
    println!("  Pending:  {}", summary.counts.pending);
    println!("  Records:  {}", summary.counts.records);
    if summary.zero_yield > 0 {
        println!("  Zero-yield targets: {}", summary.zero_yield);
    }
    println!(
        "  Duration: {}s, {:.1}% complete",
        summary.duration_seconds(),
        summary.completion_rate()
    );
    println!("  Output:   {}", summary.output_path.display());
}
