//! Append-only CSV result sink
//!
//! Records are staged in memory per target and written in batches. A batch
//! is encoded up front and handed to the file in a single `write_all`
//! followed by `sync_data`. If either fails the file is cut back to its
//! previous length, so the on-disk output only ever grows by whole batches.

use crate::targets::TargetId;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Columns written ahead of the extracted fields
pub const RESERVED_COLUMNS: [&str; 3] = ["origin", "destination", "target_date"];

/// Errors raised while flushing records
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("output I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV encoding error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV buffer error: {0}")]
    Buffer(String),
}

/// One extracted row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub target: TargetId,
    /// Field name and value pairs, in rule order
    pub fields: Vec<(String, String)>,
}

#[derive(Debug)]
struct StagedTarget {
    target: TargetId,
    records: Vec<Record>,
}

/// Buffers records and flushes them durably to the run's CSV file
#[derive(Debug)]
pub struct ResultSink {
    path: PathBuf,
    fields: Vec<String>,
    staged: Vec<StagedTarget>,
    buffered_records: usize,
    records_written: u64,
}

impl ResultSink {
    /// Creates a sink writing to `path` with the given extracted field columns
    ///
    /// Nothing touches the filesystem until the first flush.
    pub fn new(path: impl Into<PathBuf>, fields: Vec<String>) -> Self {
        Self {
            path: path.into(),
            fields,
            staged: Vec::new(),
            buffered_records: 0,
            records_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stages a target's records; an empty list still stages the target
    pub fn append(&mut self, target: TargetId, records: Vec<Record>) {
        self.buffered_records += records.len();
        self.staged.push(StagedTarget { target, records });
    }

    /// Records waiting for the next flush
    pub fn buffered_records(&self) -> usize {
        self.buffered_records
    }

    /// Targets waiting for the next flush
    pub fn staged_targets(&self) -> usize {
        self.staged.len()
    }

    /// Records made durable by this sink so far
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Writes every staged record and returns the targets made durable
    ///
    /// A no-op on an empty buffer. On error nothing is written and the
    /// buffer is kept for the next attempt.
    pub fn flush(&mut self) -> Result<Vec<TargetId>, SinkError> {
        if self.staged.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let prior_len = file.metadata()?.len();

        let batch = self.encode(prior_len == 0)?;
        if let Err(e) = write_durably(&mut file, &batch) {
            tracing::error!(
                "Write to {} failed, truncating back to {} bytes",
                self.path.display(),
                prior_len
            );
            // Best effort; the original error is what gets reported
            let _ = file.set_len(prior_len);
            return Err(e.into());
        }

        let flushed: Vec<TargetId> = self.staged.drain(..).map(|s| s.target).collect();
        self.records_written += self.buffered_records as u64;
        tracing::debug!(
            "Flushed {} records for {} targets to {}",
            self.buffered_records,
            flushed.len(),
            self.path.display()
        );
        self.buffered_records = 0;

        Ok(flushed)
    }

    fn encode(&self, with_header: bool) -> Result<Vec<u8>, SinkError> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        if with_header {
            let header = RESERVED_COLUMNS
                .iter()
                .copied()
                .chain(self.fields.iter().map(String::as_str));
            writer.write_record(header)?;
        }

        for staged in &self.staged {
            for record in &staged.records {
                writer.write_record(self.row(record))?;
            }
        }

        writer
            .into_inner()
            .map_err(|e| SinkError::Buffer(e.error().to_string()))
    }

    /// Lays out a record in column order; missing fields become empty cells
    fn row(&self, record: &Record) -> Vec<String> {
        let date = record.target.date.to_string();
        let mut row = vec![
            record.target.origin.clone(),
            record.target.destination.clone(),
            date,
        ];
        row.extend(self.fields.iter().map(|name| {
            record
                .fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value.clone())
                .unwrap_or_default()
        }));
        row
    }
}

fn write_durably(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes)?;
    file.sync_data()
}

/// Output file for a run
pub fn output_path(directory: &Path, run_id: i64) -> PathBuf {
    directory.join(format!("run-{:04}.csv", run_id))
}

/// Markdown summary file for a run
pub fn summary_path(directory: &Path, run_id: i64) -> PathBuf {
    directory.join(format!("run-{:04}.md", run_id))
}
