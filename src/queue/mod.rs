//! Work queue and checkpointing
//!
//! This module owns the set of crawl targets and their statuses:
//! - `WorkQueue`: dedup store with atomic claim/complete/retry transitions
//! - `CrawlState`: the persisted snapshot of the queue
//! - `CheckpointStore`: atomic write-to-temp + rename persistence of snapshots

mod checkpoint;
mod work_queue;

pub use checkpoint::{CheckpointError, CheckpointStore, CrawlState, StateEntry};
pub use work_queue::{QueueCounts, QueueEntry, WorkQueue};
