//! In-memory work queue with dedup on target identity
//!
//! All transitions happen under one mutex, so two workers can never claim
//! the same entry. Workers that find nothing to claim wait on
//! [`WorkQueue::notified`], which fires whenever an entry changes state.

use crate::queue::checkpoint::{CrawlState, StateEntry};
use crate::state::EntryStatus;
use crate::targets::{Target, TargetId};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// A target together with its queue status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub target: Target,
    pub status: EntryStatus,
    /// Position in generator order
    pub seq: u64,
}

/// Entry counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub done: usize,
    pub failed: usize,
}

impl QueueCounts {
    /// Total number of entries
    pub fn total(&self) -> usize {
        self.pending + self.in_flight + self.done + self.failed
    }
}

/// Heap slot for a pending entry
///
/// Lower attempt counts pop first so fresh work is never starved behind a
/// target that keeps failing; generator order breaks ties.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingSlot {
    attempts: u32,
    seq: u64,
    id: TargetId,
}

impl Ord for PendingSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap
        other
            .attempts
            .cmp(&self.attempts)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    run_id: i64,
    config_hash: String,
    entries: HashMap<TargetId, QueueEntry>,
    pending: BinaryHeap<PendingSlot>,
    next_seq: u64,
}

impl QueueInner {
    fn push_pending(&mut self, entry_id: TargetId, attempts: u32, seq: u64) {
        self.pending.push(PendingSlot {
            attempts,
            seq,
            id: entry_id,
        });
    }

    fn in_flight_mut(&mut self, id: &TargetId) -> Option<&mut QueueEntry> {
        self.entries
            .get_mut(id)
            .filter(|entry| entry.status == EntryStatus::InFlight)
    }
}

/// Work queue and dedup store
pub struct WorkQueue {
    inner: Mutex<QueueInner>,
    changed: Notify,
    max_attempts: u32,
}

impl WorkQueue {
    /// Creates an empty queue for a run
    pub fn new(run_id: i64, config_hash: &str, max_attempts: u32) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                run_id,
                config_hash: config_hash.to_string(),
                ..Default::default()
            }),
            changed: Notify::new(),
            max_attempts,
        }
    }

    /// Creates a queue from a persisted checkpoint
    pub fn from_state(state: CrawlState, max_attempts: u32) -> Self {
        let queue = Self::new(state.run_id, &state.config_hash, max_attempts);
        queue.restore(state);
        queue
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // A panicking worker must not wedge the whole crawl
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run identifier this queue belongs to
    pub fn run_id(&self) -> i64 {
        self.lock().run_id
    }

    /// Maximum attempts before an entry fails
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Adds a target as pending
    ///
    /// Returns false, and changes nothing, if an entry with the same identity
    /// already exists.
    pub fn enqueue(&self, target: Target) -> bool {
        let added = {
            let mut inner = self.lock();
            let id = target.id();
            if inner.entries.contains_key(&id) {
                false
            } else {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.push_pending(id.clone(), target.attempts, seq);
                inner.entries.insert(
                    id,
                    QueueEntry {
                        target,
                        status: EntryStatus::Pending,
                        seq,
                    },
                );
                true
            }
        };

        if added {
            self.changed.notify_waiters();
        }
        added
    }

    /// Enqueues every target of an iterator, returning how many were new
    pub fn enqueue_all<I>(&self, targets: I) -> usize
    where
        I: IntoIterator<Item = Target>,
    {
        targets
            .into_iter()
            .map(|target| self.enqueue(target))
            .filter(|added| *added)
            .count()
    }

    /// Claims the next pending target, marking it in flight
    pub fn claim(&self) -> Option<Target> {
        let mut inner = self.lock();
        while let Some(slot) = inner.pending.pop() {
            if let Some(entry) = inner.entries.get_mut(&slot.id) {
                if entry.status == EntryStatus::Pending {
                    entry.status = EntryStatus::InFlight;
                    return Some(entry.target.clone());
                }
            }
        }
        None
    }

    /// Marks an in-flight target done, counting the successful attempt
    ///
    /// Callers must only do this once the target's records are durable.
    pub fn complete(&self, id: &TargetId) -> bool {
        let completed = {
            let mut inner = self.lock();
            match inner.in_flight_mut(id) {
                Some(entry) => {
                    entry.target.attempts += 1;
                    entry.status = EntryStatus::Done;
                    true
                }
                None => false,
            }
        };

        if completed {
            self.changed.notify_waiters();
        }
        completed
    }

    /// Records a failed attempt
    ///
    /// Below the attempt limit the target goes back to pending and this
    /// returns true. At the limit it becomes failed and this returns false.
    /// Calling it on an entry that is not in flight is a no-op returning false.
    pub fn retry(&self, id: &TargetId) -> bool {
        let requeued = {
            let mut inner = self.lock();
            let max_attempts = self.max_attempts;
            let requeue = match inner.in_flight_mut(id) {
                Some(entry) => {
                    entry.target.attempts += 1;
                    if entry.target.attempts < max_attempts {
                        entry.status = EntryStatus::Pending;
                        Some((entry.target.attempts, entry.seq))
                    } else {
                        entry.status = EntryStatus::Failed;
                        None
                    }
                }
                None => return false,
            };

            match requeue {
                Some((attempts, seq)) => {
                    inner.push_pending(id.clone(), attempts, seq);
                    true
                }
                None => false,
            }
        };

        self.changed.notify_waiters();
        requeued
    }

    /// Fails an in-flight target immediately, counting the attempt
    pub fn give_up(&self, id: &TargetId) -> bool {
        let failed = {
            let mut inner = self.lock();
            match inner.in_flight_mut(id) {
                Some(entry) => {
                    entry.target.attempts += 1;
                    entry.status = EntryStatus::Failed;
                    true
                }
                None => false,
            }
        };

        if failed {
            self.changed.notify_waiters();
        }
        failed
    }

    /// Returns an in-flight target to pending without counting an attempt
    ///
    /// Used when a worker is cancelled before its request started.
    pub fn release(&self, id: &TargetId) -> bool {
        let released = {
            let mut inner = self.lock();
            let slot = inner.in_flight_mut(id).map(|entry| {
                entry.status = EntryStatus::Pending;
                (entry.target.attempts, entry.seq)
            });
            match slot {
                Some((attempts, seq)) => {
                    inner.push_pending(id.clone(), attempts, seq);
                    true
                }
                None => false,
            }
        };

        if released {
            self.changed.notify_waiters();
        }
        released
    }

    /// Looks up an entry by identity
    pub fn get(&self, id: &TargetId) -> Option<QueueEntry> {
        self.lock().entries.get(id).cloned()
    }

    /// Counts entries by status
    pub fn counts(&self) -> QueueCounts {
        let inner = self.lock();
        let mut counts = QueueCounts::default();
        for entry in inner.entries.values() {
            match entry.status {
                EntryStatus::Pending => counts.pending += 1,
                EntryStatus::InFlight => counts.in_flight += 1,
                EntryStatus::Done => counts.done += 1,
                EntryStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// True when nothing is pending and nothing is in flight
    pub fn is_drained(&self) -> bool {
        let counts = self.counts();
        counts.pending == 0 && counts.in_flight == 0
    }

    /// A future that resolves on the next state change
    ///
    /// Create it (and call `enable`) before inspecting the queue, then await
    /// it, so a change between the check and the await is not missed.
    pub fn notified(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// Takes a consistent snapshot of every entry, in generator order
    pub fn snapshot(&self) -> CrawlState {
        let inner = self.lock();
        let mut entries: Vec<&QueueEntry> = inner.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);

        CrawlState {
            run_id: inner.run_id,
            config_hash: inner.config_hash.clone(),
            entries: entries
                .into_iter()
                .map(|entry| StateEntry {
                    origin: entry.target.origin.clone(),
                    destination: entry.target.destination.clone(),
                    date: entry.target.date,
                    status: entry.status,
                    attempts: entry.target.attempts,
                })
                .collect(),
        }
    }

    /// Replaces the queue contents with a snapshot
    ///
    /// In-flight entries are demoted to pending. Duplicate identities in the
    /// snapshot keep their first occurrence.
    pub fn restore(&self, state: CrawlState) {
        {
            let mut inner = self.lock();
            inner.run_id = state.run_id;
            inner.config_hash = state.config_hash;
            inner.entries.clear();
            inner.pending.clear();
            inner.next_seq = 0;

            for persisted in state.entries {
                let mut target = Target::new(&persisted.origin, &persisted.destination, persisted.date);
                target.attempts = persisted.attempts;
                let id = target.id();
                if inner.entries.contains_key(&id) {
                    continue;
                }

                let seq = inner.next_seq;
                inner.next_seq += 1;
                let status = persisted.status.on_restore();
                if status == EntryStatus::Pending {
                    inner.push_pending(id.clone(), target.attempts, seq);
                }
                inner.entries.insert(id, QueueEntry { target, status, seq });
            }
        }
        self.changed.notify_waiters();
    }
}
