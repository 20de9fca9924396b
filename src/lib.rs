//! fare-harvest: a polite, resumable fare-calendar crawler
//!
//! This crate crawls route/date combinations on a fare-search site, extracts
//! prices with a declarative selector rule, and appends them to a CSV file.
//! Progress is checkpointed so an interrupted crawl resumes where it stopped.

pub mod config;
pub mod crawler;
pub mod output;
pub mod queue;
pub mod robots;
pub mod state;
pub mod storage;
pub mod targets;
pub mod url;

use thiserror::Error;

/// Run-level error type for fare-harvest
///
/// Per-target failures never surface here; they are handled inside the
/// crawl workers. Everything in this enum stops the run.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] queue::CheckpointError),

    #[error("Result sink error: {0}")]
    Sink(#[from] output::SinkError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL template: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("Date range has no end; refusing to generate an unbounded crawl")]
    UnboundedRange,
}

/// Result type alias for run-level operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlOutcome, RunPhase};
pub use state::EntryStatus;
pub use targets::{Target, TargetId};
