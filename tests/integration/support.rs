//! Shared fixtures for the integration tests

use async_trait::async_trait;
use fare_harvest::config::{parse_config, Config};
use fare_harvest::crawler::{HttpResponse, Transport, TransportError};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const FARE_PAGE: &str = r#"<html><body>
<div class="calendar">
  <div class="cell" data-day="{day}"><span class="price">412 €</span></div>
</div>
</body></html>"#;

/// Writes a configuration into `dir` and parses it
///
/// The crawl covers MAD to each of `destinations` from 2025-06-01 through
/// `end_date`, one target per day.
pub fn test_config(
    dir: &TempDir,
    base_url: &str,
    destinations: &[&str],
    end_date: &str,
    max_attempts: u32,
    respect_robots: bool,
) -> Config {
    let destinations = destinations
        .iter()
        .map(|d| format!("\"{}\"", d))
        .collect::<Vec<_>>()
        .join(", ");

    let content = format!(
        r#"
[crawler]
concurrency = 1
max-domain-concurrency = 1
request-spacing = 100
max-attempts = {max_attempts}
retry-base-delay = 10
max-backoff = 40
fetch-timeout = 5
flush-threshold = 1
flush-interval = 1

[routes]
origins = ["MAD"]
destinations = [{destinations}]
start-date = "2025-06-01"
end-date = "{end_date}"

[request]
url-template = "{base_url}/fares/{{origin}}/{{destination}}/{{date}}"
user-agents = ["fare-harvest-test"]
respect-robots = {respect_robots}

[output]
directory = "{dir}/out"
state-path = "{dir}/state.toml"
ledger-path = "{dir}/ledger.db"

[extract]
root = "div.cell"

[[extract.field]]
name = "day"
attr = "data-day"

[[extract.field]]
name = "price"
selector = ".price"
"#,
        dir = dir.path().display(),
    );

    parse_config(&content).expect("test config should be valid")
}

pub fn state_path(dir: &TempDir) -> PathBuf {
    dir.path().join("state.toml")
}

pub fn output_file(dir: &TempDir, run_id: i64) -> PathBuf {
    dir.path().join("out").join(format!("run-{:04}.csv", run_id))
}

/// Data rows of a run's CSV, header excluded
pub fn csv_rows(path: &Path) -> Vec<String> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    content.lines().skip(1).map(String::from).collect()
}

/// Builds the fare page served for `path`, one cell tagged with the date
pub fn fare_page(path: &str) -> String {
    let day = path.rsplit('/').next().unwrap_or_default();
    FARE_PAGE.replace("{day}", day)
}

/// In-memory transport replaying status codes per path
///
/// Paths without a script, or whose script is used up, answer 200 with a
/// one-cell fare page. Every request path is recorded in order.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<u16>>>,
    always: HashMap<String, u16>,
    requests: Mutex<Vec<String>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `path` with `statuses` in order, then with the default page
    pub fn script(self, path: &str, statuses: &[u16]) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(path.to_string(), statuses.iter().copied().collect());
        self
    }

    /// Answers `path` with `status` on every request
    pub fn always(mut self, path: &str, status: u16) -> Self {
        self.always.insert(path.to_string(), status);
        self
    }

    /// Cancels `token` while serving the `count`-th request
    pub fn cancel_after(mut self, count: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((count, token));
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.requests().iter().filter(|p| *p == path).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &Url, _user_agent: &str) -> Result<HttpResponse, TransportError> {
        let path = url.path().to_string();
        let served = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(path.clone());
            requests.len()
        };

        if let Some((count, token)) = &self.cancel_after {
            if served == *count {
                token.cancel();
            }
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&path)
            .and_then(VecDeque::pop_front);
        let status_code = scripted
            .or_else(|| self.always.get(&path).copied())
            .unwrap_or(200);

        let body = if status_code == 200 {
            fare_page(&path).into_bytes()
        } else {
            Vec::new()
        };

        Ok(HttpResponse { status_code, body })
    }
}
