//! SQLite ledger implementation

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Ledger, StorageError, StorageResult};
use crate::storage::{DeadLetterRecord, RunCounts, RunRecord, RunStatus};
use crate::targets::Target;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const RUN_COLUMNS: &str = "id, started_at, finished_at, config_hash, status, \
     done_count, failed_count, pending_count, record_count";

/// SQLite ledger backend
pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    /// Opens or creates the ledger database, creating parent directories
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA foreign_keys = ON;
        ",
        )?;
        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory ledger (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Interrupted),
        counts: RunCounts {
            done: row.get::<_, i64>(5)? as u64,
            failed: row.get::<_, i64>(6)? as u64,
            pending: row.get::<_, i64>(7)? as u64,
            records: row.get::<_, i64>(8)? as u64,
        },
    })
}

impl Ledger for SqliteLedger {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn resume_run(&mut self, run_id: i64, config_hash: &str) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = NULL WHERE id = ?2",
            params![RunStatus::Running.to_db_string(), run_id],
        )?;

        if updated == 0 {
            let now = Utc::now().to_rfc3339();
            self.conn.execute(
                "INSERT INTO runs (id, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
                params![run_id, now, config_hash, RunStatus::Running.to_db_string()],
            )?;
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![run_id], run_from_row)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS);
        Ok(self.conn.query_row(&sql, [], run_from_row).optional()?)
    }

    fn list_runs(&self) -> StorageResult<Vec<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC", RUN_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let runs = stmt
            .query_map([], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus, counts: &RunCounts) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, done_count = ?3, failed_count = ?4,
                pending_count = ?5, record_count = ?6
             WHERE id = ?7",
            params![
                status.to_db_string(),
                now,
                counts.done as i64,
                counts.failed as i64,
                counts.pending as i64,
                counts.records as i64,
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Dead Letters =====

    fn record_dead_letter(&mut self, run_id: i64, target: &Target, reason: &str) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO dead_letters
                (run_id, origin, destination, target_date, attempts, reason, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                target.origin,
                target.destination,
                target.date.to_string(),
                target.attempts,
                reason,
                now
            ],
        )?;
        Ok(())
    }

    fn dead_letters(&self, run_id: i64) -> StorageResult<Vec<DeadLetterRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, origin, destination, target_date, attempts, reason, recorded_at
             FROM dead_letters WHERE run_id = ?1 ORDER BY id",
        )?;

        let letters = stmt
            .query_map(params![run_id], |row| {
                Ok(DeadLetterRecord {
                    run_id: row.get(0)?,
                    origin: row.get(1)?,
                    destination: row.get(2)?,
                    target_date: row.get(3)?,
                    attempts: row.get(4)?,
                    reason: row.get(5)?,
                    recorded_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(letters)
    }
}
