//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `EntryStatus`: lifecycle of a single queue entry (pending, in flight, done, failed)
//! - `DomainState`: per-domain request spacing and retry backoff

mod domain_state;
mod entry_status;

// Re-export main types
pub use domain_state::{BackoffPolicy, DomainState};
pub use entry_status::EntryStatus;
