//! Crawler module for fare page fetching and extraction
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching behind the [`Transport`] seam
//! - Per-domain limits, spacing and backoff
//! - Declarative record extraction
//! - Overall crawl coordination

mod coordinator;
mod extractor;
mod fetcher;
mod limiter;

pub use coordinator::{run_crawl, Coordinator, CrawlOutcome, RunPhase};
pub use extractor::{extract, ExtractionRule};
pub use fetcher::{
    build_http_client, FetchResult, HttpResponse, RateLimitedFetcher, ReqwestTransport, Transport,
    TransportError,
};
pub use limiter::{DomainLimiter, DomainPermit};
