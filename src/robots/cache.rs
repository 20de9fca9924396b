//! Per-domain robots.txt cache with 24 hour expiry

use crate::robots::RobotsPolicy;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// A robots policy together with the time it was fetched
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub policy: Arc<RobotsPolicy>,
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    pub fn new(policy: RobotsPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            fetched_at: Utc::now(),
        }
    }

    /// Whether the entry is older than `ttl`
    pub fn is_stale(&self, ttl: Duration) -> bool {
        Utc::now() - self.fetched_at > ttl
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<CachedRobots>>>;

/// Cache of robots policies keyed by domain
///
/// Each domain has its own async lock, so concurrent workers wait for a
/// single in-progress robots.txt fetch instead of issuing their own.
pub struct RobotsCache {
    slots: Mutex<HashMap<String, Slot>>,
    ttl: Duration,
}

impl Default for RobotsCache {
    fn default() -> Self {
        Self::new(Duration::hours(24))
    }
}

impl RobotsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn slot(&self, domain: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.entry(domain.to_string()).or_default().clone()
    }

    /// Returns the cached policy for `domain`, fetching it when absent or stale
    ///
    /// A fetch that yields None (it was cancelled) leaves the cache untouched.
    pub async fn get_or_fetch<F, Fut>(&self, domain: &str, fetch: F) -> Option<Arc<RobotsPolicy>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<RobotsPolicy>>,
    {
        let slot = self.slot(domain);
        let mut cached = slot.lock().await;

        if let Some(entry) = cached.as_ref() {
            if !entry.is_stale(self.ttl) {
                return Some(Arc::clone(&entry.policy));
            }
            tracing::debug!("robots.txt for {} is stale, refetching", domain);
        }

        let entry = CachedRobots::new(fetch().await?);
        let policy = Arc::clone(&entry.policy);
        *cached = Some(entry);
        Some(policy)
    }

    /// Returns the cached policy without fetching
    pub async fn get(&self, domain: &str) -> Option<Arc<RobotsPolicy>> {
        let slot = self.slot(domain);
        let cached = slot.lock().await;
        cached.as_ref().map(|entry| Arc::clone(&entry.policy))
    }
}
