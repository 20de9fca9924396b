//! Rate-limited HTTP fetcher
//!
//! This module handles all HTTP requests for the crawler, including:
//! - The [`Transport`] seam over the HTTP client
//! - Per-domain limits, spacing and backoff via [`DomainLimiter`]
//! - robots.txt policy lookup
//! - User-agent rotation
//! - Classification of responses into [`FetchResult`]

use crate::config::{Config, CrawlerConfig};
use crate::crawler::limiter::DomainLimiter;
use crate::robots::{policy_from_response, robots_url, RobotsCache, RobotsPolicy};
use crate::targets::Target;
use crate::url::extract_domain;
use async_trait::async_trait;
use reqwest::{header::USER_AGENT, redirect::Policy, Client};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

/// A raw HTTP response as seen by the fetcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: Vec<u8>,
}

/// The request never produced a response
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Issues a single GET request
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url, user_agent: &str) -> Result<HttpResponse, TransportError>;
}

/// Result of a fetch operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// 2xx response
    Success { status_code: u16, body: Vec<u8> },

    /// 5xx response; retryable
    ServerError { status_code: u16 },

    /// No response at all (connection, timeout, TLS); retryable
    TransportError { error: String },

    /// 403 or 429; retryable with a harder backoff
    RateLimited { status_code: u16 },

    /// Any other non-2xx status; permanent
    Rejected { status_code: u16 },

    /// robots.txt disallows the URL; permanent
    Disallowed,

    /// Cancelled before the request started
    Cancelled,
}

impl FetchResult {
    /// Maps an HTTP response to a fetch result
    pub fn from_response(response: HttpResponse) -> Self {
        match response.status_code {
            200..=299 => Self::Success {
                status_code: response.status_code,
                body: response.body,
            },
            403 | 429 => Self::RateLimited {
                status_code: response.status_code,
            },
            code if code >= 500 => Self::ServerError { status_code: code },
            code => Self::Rejected { status_code: code },
        }
    }

    /// Whether the target should be tried again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServerError { .. } | Self::TransportError { .. } | Self::RateLimited { .. }
        )
    }

    /// Short description used in logs and the dead-letter ledger
    pub fn describe(&self) -> String {
        match self {
            Self::Success { status_code, .. } => format!("HTTP {}", status_code),
            Self::ServerError { status_code } => format!("server error (HTTP {})", status_code),
            Self::TransportError { error } => format!("transport error: {}", error),
            Self::RateLimited { status_code } => format!("rate limited (HTTP {})", status_code),
            Self::Rejected { status_code } => format!("rejected (HTTP {})", status_code),
            Self::Disallowed => "disallowed by robots.txt".to_string(),
            Self::Cancelled => "cancelled".to_string(),
        }
    }
}

/// Builds the HTTP client used by [`ReqwestTransport`]
///
/// The user agent is not set here; it is chosen per request.
pub fn build_http_client(config: &CrawlerConfig) -> Result<Client, reqwest::Error> {
    let timeout = Duration::from_secs(config.fetch_timeout);

    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`Transport`] backed by reqwest
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &CrawlerConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::new(build_http_client(config)?))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &Url, user_agent: &str) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, user_agent)
            .send()
            .await
            .map_err(classify_error)?;

        let status_code = response.status().as_u16();
        let body = response.bytes().await.map_err(classify_error)?;

        Ok(HttpResponse {
            status_code,
            body: body.to_vec(),
        })
    }
}

fn classify_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError("request timeout".to_string())
    } else if e.is_connect() {
        TransportError(format!("connection failed: {}", e))
    } else if e.is_redirect() {
        TransportError(format!("redirect error: {}", e))
    } else {
        TransportError(e.to_string())
    }
}

/// Fetcher enforcing per-domain politeness and robots policy
pub struct RateLimitedFetcher {
    transport: Arc<dyn Transport>,
    limiter: DomainLimiter,
    robots: Option<RobotsCache>,
    robots_agent: String,
    user_agents: Vec<String>,
    cancel: CancellationToken,
}

impl RateLimitedFetcher {
    pub fn new(transport: Arc<dyn Transport>, config: &Config, cancel: CancellationToken) -> Self {
        Self {
            transport,
            limiter: DomainLimiter::from_config(&config.crawler),
            robots: config.request.respect_robots.then(RobotsCache::default),
            robots_agent: config.request.robots_agent.clone(),
            user_agents: config.request.user_agent_pool(),
            cancel,
        }
    }

    fn pick_user_agent(&self) -> &str {
        if self.user_agents.is_empty() {
            return &self.robots_agent;
        }
        &self.user_agents[rand::random_range(0..self.user_agents.len())]
    }

    /// Fetches `url` on behalf of `target`
    ///
    /// Never fails; every outcome is a [`FetchResult`]. Once the request has
    /// started it runs to completion (bounded by the client timeout) even if
    /// cancellation fires.
    pub async fn fetch(&self, target: &Target, url: &Url) -> FetchResult {
        let Some(domain) = extract_domain(url) else {
            return FetchResult::TransportError {
                error: format!("no host in {}", url),
            };
        };

        if let Some(cache) = &self.robots {
            let policy = cache
                .get_or_fetch(&domain, || self.fetch_robots(url, &domain))
                .await;
            match policy {
                Some(policy) if !policy.allows(url.as_str(), &self.robots_agent) => {
                    return FetchResult::Disallowed;
                }
                Some(_) => {}
                None => return FetchResult::Cancelled,
            }
        }

        let Some(permit) = self.limiter.acquire(&domain, &self.cancel).await else {
            return FetchResult::Cancelled;
        };

        let user_agent = self.pick_user_agent().to_string();
        tracing::debug!("GET {} for {}", url, target);
        let outcome = self.transport.get(url, &user_agent).await;
        drop(permit);

        let result = match outcome {
            Ok(response) => FetchResult::from_response(response),
            Err(e) => FetchResult::TransportError { error: e.0 },
        };

        match &result {
            FetchResult::Success { .. } => self.limiter.record_success(&domain),
            FetchResult::RateLimited { .. } => {
                self.limiter.record_failure(&domain, true);
            }
            r if r.is_retryable() => {
                self.limiter.record_failure(&domain, false);
            }
            _ => {}
        }

        result
    }

    /// Fetches and parses robots.txt for the site serving `url`
    ///
    /// Returns None only when cancelled before the request started.
    async fn fetch_robots(&self, url: &Url, domain: &str) -> Option<RobotsPolicy> {
        let Some(robots) = robots_url(url) else {
            return Some(RobotsPolicy::allow_all());
        };

        let permit = self.limiter.acquire(domain, &self.cancel).await?;
        let user_agent = self.pick_user_agent().to_string();
        let outcome = self.transport.get(&robots, &user_agent).await;
        drop(permit);

        let policy = match outcome {
            Ok(response) => {
                tracing::debug!("robots.txt for {}: HTTP {}", domain, response.status_code);
                policy_from_response(response.status_code, &response.body)
            }
            Err(e) => {
                tracing::warn!("Could not fetch robots.txt for {}: {}, allowing all", domain, e);
                RobotsPolicy::allow_all()
            }
        };

        let delay = policy.crawl_delay(&self.robots_agent);
        if let Some(seconds) = delay {
            tracing::info!("{} asks for a Crawl-delay of {}s", domain, seconds);
        }
        self.limiter.set_crawl_delay(domain, delay);

        Some(policy)
    }
}
