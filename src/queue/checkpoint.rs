//! Durable checkpoint of the work queue
//!
//! The checkpoint is a TOML document written to a temporary file, synced,
//! then renamed over the previous one. A reader therefore sees either the
//! old checkpoint or the new one, never a partial write.

use crate::state::EntryStatus;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading or writing a checkpoint
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize checkpoint: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("corrupt checkpoint: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Persisted snapshot of a run's queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlState {
    pub run_id: i64,
    pub config_hash: String,
    #[serde(rename = "entry", default)]
    pub entries: Vec<StateEntry>,
}

/// One persisted queue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub origin: String,
    pub destination: String,
    pub date: NaiveDate,
    pub status: EntryStatus,
    pub attempts: u32,
}

impl CrawlState {
    /// Counts entries that still have work left
    pub fn unfinished(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .count()
    }
}

/// Reads and writes the checkpoint file
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the checkpoint, or None if there is none yet
    pub fn load(&self) -> Result<Option<CrawlState>, CheckpointError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state: CrawlState = toml::from_str(&content)?;
        Ok(Some(state))
    }

    /// Atomically replaces the checkpoint
    pub fn save(&self, state: &CrawlState) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string(state)?;
        let tmp_path = self.tmp_path();
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(&self.path)?;

        tracing::debug!(
            "Checkpoint saved to {} ({} entries)",
            self.path.display(),
            state.entries.len()
        );
        Ok(())
    }

    /// Removes the checkpoint so the next start begins a fresh run
    pub fn clear(&self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Syncs the directory holding `path` so a completed rename survives power loss
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
