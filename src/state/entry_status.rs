/// Entry status definitions for the work queue
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current status of a target in the work queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    // ===== Active States =====
    /// Waiting to be claimed by a worker
    Pending,

    /// Claimed by a worker; fetched or awaiting a flush of its records
    InFlight,

    // ===== Terminal States =====
    /// Fetched, extracted, and its records durably flushed
    Done,

    /// Gave up: retries exhausted or a permanent failure (dead letter)
    Failed,
}

impl EntryStatus {
    /// Returns true if no further processing will happen for this entry
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if this entry still needs work
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InFlight)
    }

    /// Status to use when loading a checkpoint
    ///
    /// Nothing is in flight in a fresh process, so in-flight entries from a
    /// crashed or interrupted run are demoted to pending.
    pub fn on_restore(self) -> Self {
        match self {
            Self::InFlight => Self::Pending,
            other => other,
        }
    }

    /// Converts the status to its persisted string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its persisted string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all statuses
    pub fn all_statuses() -> [Self; 4] {
        [Self::Pending, Self::InFlight, Self::Done, Self::Failed]
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
