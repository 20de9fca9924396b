//! Per-domain politeness limits
//!
//! Each domain gets a semaphore capping concurrent requests and a
//! [`DomainState`] holding the next permitted start instant. Callers reserve
//! a start slot under the lock and sleep outside it, so starts to one domain
//! are always at least one spacing apart.

use crate::config::CrawlerConfig;
use crate::state::{BackoffPolicy, DomainState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

struct DomainSlot {
    state: DomainState,
    permits: Arc<Semaphore>,
}

/// Held for the duration of one request
#[derive(Debug)]
pub struct DomainPermit {
    _permit: OwnedSemaphorePermit,
}

/// Rate limiter shared by all workers
pub struct DomainLimiter {
    domains: Mutex<HashMap<String, DomainSlot>>,
    spacing: Duration,
    max_per_domain: usize,
    policy: BackoffPolicy,
}

impl DomainLimiter {
    pub fn new(spacing: Duration, max_per_domain: usize, policy: BackoffPolicy) -> Self {
        Self {
            domains: Mutex::new(HashMap::new()),
            spacing,
            max_per_domain: max_per_domain.max(1),
            policy,
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(
            Duration::from_millis(config.request_spacing),
            config.max_domain_concurrency as usize,
            BackoffPolicy::from_config(config),
        )
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DomainSlot>> {
        self.domains.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn with_slot<T>(&self, domain: &str, f: impl FnOnce(&mut DomainSlot) -> T) -> T {
        let mut domains = self.lock();
        let slot = domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainSlot {
                state: DomainState::new(&self.policy),
                permits: Arc::new(Semaphore::new(self.max_per_domain)),
            });
        f(slot)
    }

    /// Waits until a request to `domain` may start
    ///
    /// Returns None if `cancel` fires first; no request may be started then.
    pub async fn acquire(&self, domain: &str, cancel: &CancellationToken) -> Option<DomainPermit> {
        let permits = self.with_slot(domain, |slot| Arc::clone(&slot.permits));

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            permit = permits.acquire_owned() => permit.ok()?,
        };

        let start = self.with_slot(domain, |slot| {
            let spacing = slot.state.spacing(self.spacing);
            slot.state.reserve_slot(Instant::now(), spacing)
        });

        let wait = start.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            tracing::trace!("Waiting {:?} before next request to {}", wait, domain);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        Some(DomainPermit { _permit: permit })
    }

    /// Resets the domain's backoff after a successful request
    pub fn record_success(&self, domain: &str) {
        self.with_slot(domain, |slot| slot.state.record_success(&self.policy));
    }

    /// Pushes the domain's next start out after a retryable failure
    pub fn record_failure(&self, domain: &str, rate_limited: bool) -> Duration {
        let pause = self.with_slot(domain, |slot| {
            slot.state
                .record_failure(Instant::now(), rate_limited, &self.policy)
        });
        if rate_limited {
            tracing::warn!("{} is rate limiting, backing off for {:?}", domain, pause);
        } else {
            tracing::debug!("Backing off {} for {:?}", domain, pause);
        }
        pause
    }

    /// Applies a robots.txt Crawl-delay to the domain
    pub fn set_crawl_delay(&self, domain: &str, seconds: Option<f64>) {
        self.with_slot(domain, |slot| slot.state.set_crawl_delay(seconds));
    }

    /// Requests started against `domain` so far
    pub fn request_count(&self, domain: &str) -> u64 {
        self.lock()
            .get(domain)
            .map_or(0, |slot| slot.state.request_count)
    }
}
