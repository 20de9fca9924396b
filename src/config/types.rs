use crate::targets::Granularity;
use chrono::NaiveDate;
use serde::Deserialize;

/// Browser user agents rotated per request when the config lists none
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:137.0) Gecko/20100101 Firefox/137.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:136.0) Gecko/20100101 Firefox/136.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36",
];

/// Main configuration structure for fare-harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub routes: RoutesConfig,
    pub request: RequestConfig,
    pub output: OutputConfig,
    pub extract: ExtractConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Number of concurrent crawl workers
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Maximum number of in-flight requests per domain
    #[serde(rename = "max-domain-concurrency", default = "default_concurrency")]
    pub max_domain_concurrency: u32,

    /// Minimum time between request starts to the same domain (milliseconds)
    #[serde(rename = "request-spacing", default = "default_request_spacing")]
    pub request_spacing: u64,

    /// Fetch attempts per target before it is dead-lettered
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay after a failure (milliseconds)
    #[serde(rename = "retry-base-delay", default = "default_retry_base_delay")]
    pub retry_base_delay: u64,

    /// Ceiling for the escalating retry delay (milliseconds)
    #[serde(rename = "max-backoff", default = "default_max_backoff")]
    pub max_backoff: u64,

    /// Per-request timeout (seconds)
    #[serde(rename = "fetch-timeout", default = "default_fetch_timeout")]
    pub fetch_timeout: u64,

    /// Buffered record count that triggers a flush
    #[serde(rename = "flush-threshold", default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// Maximum time between flushes (seconds)
    #[serde(rename = "flush-interval", default = "default_flush_interval")]
    pub flush_interval: u64,
}

/// The route/date space to crawl
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RoutesConfig {
    pub origins: Vec<String>,
    pub destinations: Vec<String>,
    pub start_date: NaiveDate,
    /// Inclusive. Required; an open range is rejected.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub granularity: Granularity,
}

/// How requests are built and which site policy applies
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RequestConfig {
    /// URL with `{origin}`, `{destination}`, `{date}`, `{yymm}` and `{dd}` placeholders
    pub url_template: String,

    /// Pool of user agents; one is picked at random per request
    #[serde(default)]
    pub user_agents: Vec<String>,

    /// Whether robots.txt is fetched and honored
    #[serde(default = "default_true")]
    pub respect_robots: bool,

    /// Agent token matched against robots.txt groups
    #[serde(default = "default_robots_agent")]
    pub robots_agent: String,
}

impl RequestConfig {
    /// Returns the configured user-agent pool, or the built-in one
    pub fn user_agent_pool(&self) -> Vec<String> {
        if self.user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            self.user_agents.clone()
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving `run-<id>.csv` and its summary
    pub directory: String,

    /// Path of the checkpoint file
    #[serde(rename = "state-path")]
    pub state_path: String,

    /// Path to the SQLite run ledger
    #[serde(rename = "ledger-path")]
    pub ledger_path: String,
}

/// Declarative extraction rule
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractConfig {
    /// Selector locating the data cells on a page
    pub root: String,

    /// Output fields, in column order
    #[serde(rename = "field", default)]
    pub fields: Vec<FieldConfig>,
}

/// One output column, evaluated relative to each cell
///
/// With only `selector`, the text of the first match is taken. With only
/// `attr`, the attribute is read from the cell itself. With both, the
/// attribute is read from the first selector match. With neither, the
/// cell's own text is used.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub attr: Option<String>,
}

fn default_concurrency() -> u32 {
    2
}

fn default_request_spacing() -> u64 {
    2000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_flush_threshold() -> usize {
    100
}

fn default_flush_interval() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_robots_agent() -> String {
    "fare-harvest".to_string()
}
