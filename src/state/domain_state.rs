use crate::config::CrawlerConfig;
use std::time::{Duration, Instant};

/// Longest robots.txt Crawl-delay honoured; larger values are clamped
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(3600);

/// Retry backoff limits shared by all domains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay applied after the first failure
    pub base: Duration,
    /// Ceiling for the escalating delay
    pub max: Duration,
}

impl BackoffPolicy {
    /// Builds the policy from crawler configuration
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            base: Duration::from_millis(config.retry_base_delay),
            max: Duration::from_millis(config.max_backoff),
        }
    }
}

/// Tracks the state of a domain during crawling
///
/// Holds what the limiter needs to space requests and back off after
/// failures: the earliest permitted start of the next request and the
/// current retry delay.
#[derive(Debug, Clone)]
pub struct DomainState {
    /// Number of requests started against this domain in this process
    pub request_count: u64,

    /// Earliest instant the next request may start
    pub next_start: Option<Instant>,

    /// Pause applied on the next failure
    pub retry_delay: Duration,

    /// Whether the most recent failure was a rate-limit signal (403/429)
    pub rate_limited: bool,

    /// Crawl-delay advertised by robots.txt, if any
    pub crawl_delay: Option<Duration>,
}

impl DomainState {
    /// Creates a new DomainState with the policy's base retry delay
    pub fn new(policy: &BackoffPolicy) -> Self {
        Self {
            request_count: 0,
            next_start: None,
            retry_delay: policy.base,
            rate_limited: false,
            crawl_delay: None,
        }
    }

    /// Effective spacing: the larger of the configured spacing and robots Crawl-delay
    pub fn spacing(&self, configured: Duration) -> Duration {
        match self.crawl_delay {
            Some(delay) => configured.max(delay),
            None => configured,
        }
    }

    /// Reserves the next request slot
    ///
    /// Returns the instant the caller may start its request. The slot after
    /// it is pushed out by `spacing`, so concurrent callers queue up behind
    /// each other instead of firing together.
    pub fn reserve_slot(&mut self, now: Instant, spacing: Duration) -> Instant {
        let start = match self.next_start {
            Some(next) if next > now => next,
            _ => now,
        };
        self.next_start = Some(start.checked_add(spacing).unwrap_or(start));
        self.request_count += 1;
        start
    }

    /// Records a retryable failure and pauses the domain
    ///
    /// Each failure doubles the retry delay. A rate-limit signal doubles it
    /// once more before pausing. The delay never exceeds `policy.max`.
    /// Returns the pause that was applied.
    pub fn record_failure(&mut self, now: Instant, rate_limited: bool, policy: &BackoffPolicy) -> Duration {
        if rate_limited {
            self.retry_delay = self.retry_delay.saturating_mul(2).min(policy.max);
        }
        self.rate_limited = rate_limited;

        let pause = self.retry_delay;
        if let Some(resume_at) = now.checked_add(pause) {
            if self.next_start.map_or(true, |next| next < resume_at) {
                self.next_start = Some(resume_at);
            }
        }

        self.retry_delay = self.retry_delay.saturating_mul(2).min(policy.max);
        pause
    }

    /// Records a successful request, resetting the backoff
    pub fn record_success(&mut self, policy: &BackoffPolicy) {
        self.retry_delay = policy.base;
        self.rate_limited = false;
    }

    /// Stores the robots.txt Crawl-delay in seconds, clamped to [`MAX_CRAWL_DELAY`]
    pub fn set_crawl_delay(&mut self, seconds: Option<f64>) {
        self.crawl_delay = seconds.filter(|s| *s > 0.0 && !s.is_nan()).map(|s| {
            match Duration::try_from_secs_f64(s) {
                Ok(delay) if delay <= MAX_CRAWL_DELAY => delay,
                _ => {
                    tracing::warn!(
                        "Crawl-delay of {}s clamped to {:?}",
                        s,
                        MAX_CRAWL_DELAY
                    );
                    MAX_CRAWL_DELAY
                }
            }
        });
    }
}
