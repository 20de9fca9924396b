//! Output module for crawl results and summaries
//!
//! This module handles:
//! - The append-only CSV result sink
//! - Markdown summaries of each run
//! - Run history printed from the ledger

mod markdown;
mod sink;
pub mod stats;
mod summary;

pub use markdown::{format_markdown_summary, generate_markdown_summary};
pub use sink::{output_path, summary_path, Record, ResultSink, SinkError, RESERVED_COLUMNS};
pub use stats::{load_statistics, print_statistics, LedgerStatistics};
pub use summary::{print_summary, RunSummary};
