//! Run history from the ledger

use crate::storage::{Ledger, RunRecord, StorageResult};

/// Aggregates over every run in the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStatistics {
    pub runs: Vec<RunRecord>,
    pub total_records: u64,
    pub total_failed: u64,
}

/// Loads run history from the ledger
pub fn load_statistics(ledger: &dyn Ledger) -> StorageResult<LedgerStatistics> {
    let runs = ledger.list_runs()?;
    let total_records = runs.iter().map(|r| r.counts.records).sum();
    let total_failed = runs.iter().map(|r| r.counts.failed).sum();

    Ok(LedgerStatistics {
        runs,
        total_records,
        total_failed,
    })
}

/// Prints run history to stdout, newest run first
pub fn print_statistics(stats: &LedgerStatistics) {
    println!("=== Run History ===\n");

    if stats.runs.is_empty() {
        println!("No runs recorded yet.");
        return;
    }

    println!(
        "{:>6}  {:<12} {:>8} {:>8} {:>8} {:>10}  {}",
        "run", "status", "done", "failed", "pending", "records", "started"
    );
    for run in &stats.runs {
        println!(
            "{:>6}  {:<12} {:>8} {:>8} {:>8} {:>10}  {}",
            run.id,
            run.status.to_db_string(),
            run.counts.done,
            run.counts.failed,
            run.counts.pending,
            run.counts.records,
            run.started_at
        );
    }

    println!();
    println!(
        "{} runs, {} records written, {} targets dead-lettered",
        stats.runs.len(),
        stats.total_records,
        stats.total_failed
    );
}
