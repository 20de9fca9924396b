//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the run state machine and the worker pool:
//! - Starting a fresh run or resuming from the checkpoint
//! - Spawning workers that claim, fetch, extract and stage records
//! - Flushing the sink and checkpointing on size, time and idleness
//! - Draining on completion or cancellation, aborting on persistence errors
//! - Recording the run in the ledger and writing its summary

use crate::config::Config;
use crate::crawler::extractor::{extract, ExtractionRule};
use crate::crawler::fetcher::{FetchResult, RateLimitedFetcher, ReqwestTransport, Transport};
use crate::output::{
    generate_markdown_summary, output_path, summary_path, ResultSink, RunSummary,
};
use crate::queue::{CheckpointStore, QueueCounts, WorkQueue};
use crate::storage::{open_ledger, Ledger, RunCounts, RunStatus, SqliteLedger};
use crate::targets::{generate, Target, TargetId, TargetSpec};
use crate::url::render_target_url;
use crate::{HarvestError, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Upper bound on how long an idle worker sleeps before looking again
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Configured, nothing started
    Idle,
    /// Workers are claiming and fetching
    Running,
    /// Queue exhausted or cancelled; final flush and checkpoint
    Draining,
    /// A run-level failure; best-effort checkpoint only
    Aborted,
    /// Finished
    Stopped,
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub run_id: i64,
    /// Draining or Aborted, whichever the run went through before stopping
    pub final_phase: RunPhase,
    /// Whether the run was cancelled from outside
    pub cancelled: bool,
    pub counts: QueueCounts,
    pub summary: RunSummary,
    /// The run-level error that aborted the run, if any
    pub error: Option<String>,
}

impl CrawlOutcome {
    /// Process exit code: 0 drained, 1 aborted, 2 stopped with work left
    pub fn exit_code(&self) -> u8 {
        if self.final_phase == RunPhase::Aborted {
            1
        } else if self.counts.pending + self.counts.in_flight > 0 {
            2
        } else {
            0
        }
    }
}

/// State shared by every worker
struct CrawlContext {
    run_id: i64,
    url_template: String,
    flush_threshold: usize,
    queue: WorkQueue,
    sink: Mutex<ResultSink>,
    fetcher: RateLimitedFetcher,
    rule: ExtractionRule,
    checkpoint: CheckpointStore,
    ledger: Mutex<SqliteLedger>,
    /// Stops workers; a child of the external cancellation token
    stop: CancellationToken,
    fatal: Mutex<Option<HarvestError>>,
    zero_yield: AtomicU64,
    retries: AtomicU64,
}

fn relock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CrawlContext {
    /// Flushes staged records, completes their targets and checkpoints
    ///
    /// The sink lock is held until the checkpoint is on disk, so checkpoints
    /// are written in the same order as the flushes they describe.
    fn flush_and_checkpoint(&self) -> Result<()> {
        let mut sink = relock(&self.sink);
        let flushed = sink.flush()?;
        if flushed.is_empty() {
            return Ok(());
        }

        for id in &flushed {
            self.queue.complete(id);
        }
        self.checkpoint.save(&self.queue.snapshot())?;

        let counts = self.queue.counts();
        tracing::info!(
            "Flushed {} targets: {} done, {} failed, {} remaining",
            flushed.len(),
            counts.done,
            counts.failed,
            counts.pending + counts.in_flight
        );
        Ok(())
    }

    /// Writes the current queue state without flushing
    fn save_checkpoint(&self) -> Result<()> {
        let _sink = relock(&self.sink);
        self.checkpoint.save(&self.queue.snapshot())?;
        Ok(())
    }

    /// Records a given-up target in the ledger
    fn dead_letter(&self, id: &TargetId, reason: &str) -> Result<()> {
        let Some(entry) = self.queue.get(id) else {
            return Ok(());
        };
        tracing::warn!(
            "Giving up on {} after {} attempts: {}",
            id,
            entry.target.attempts,
            reason
        );
        relock(&self.ledger).record_dead_letter(self.run_id, &entry.target, reason)?;
        Ok(())
    }

    /// Stores a run-level failure and stops all workers
    fn fail(&self, error: HarvestError) {
        tracing::error!("Aborting run {}: {}", self.run_id, error);
        let mut fatal = relock(&self.fatal);
        if fatal.is_none() {
            *fatal = Some(error);
        }
        self.stop.cancel();
    }

    fn has_failed(&self) -> bool {
        relock(&self.fatal).is_some()
    }
}

/// Runs a synchronous ledger or file step on the blocking pool
async fn offload<T, F>(step: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(step)
        .await
        .map_err(|e| HarvestError::Worker(e.to_string()))?
}

async fn dead_letter(ctx: &Arc<CrawlContext>, id: TargetId, reason: String) -> Result<()> {
    let ctx = Arc::clone(ctx);
    offload(move || ctx.dead_letter(&id, &reason)).await
}

async fn flush(ctx: &Arc<CrawlContext>) -> Result<()> {
    let ctx = Arc::clone(ctx);
    offload(move || ctx.flush_and_checkpoint()).await
}

/// Runs one claimed target through fetch, extraction and staging
async fn process(ctx: &Arc<CrawlContext>, target: Target) -> Result<()> {
    let id = target.id();

    let url = match render_target_url(&ctx.url_template, &target) {
        Ok(url) => url,
        Err(e) => {
            ctx.queue.give_up(&id);
            return dead_letter(ctx, id, format!("bad URL: {}", e)).await;
        }
    };

    match ctx.fetcher.fetch(&target, &url).await {
        FetchResult::Success { body, .. } => {
            let markup = String::from_utf8_lossy(&body);
            let records = extract(&markup, &ctx.rule, &id);
            if records.is_empty() {
                tracing::warn!("{} yielded no records from {}", id, url);
                ctx.zero_yield.fetch_add(1, Ordering::Relaxed);
            } else {
                tracing::debug!("{} yielded {} records", id, records.len());
            }

            let should_flush = {
                let mut sink = relock(&ctx.sink);
                sink.append(id, records);
                sink.buffered_records() >= ctx.flush_threshold
            };
            if should_flush {
                flush(ctx).await?;
            }
        }
        FetchResult::Cancelled => {
            ctx.queue.release(&id);
        }
        result if result.is_retryable() => {
            if ctx.queue.retry(&id) {
                ctx.retries.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("{} failed ({}), will retry", id, result.describe());
            } else {
                dead_letter(ctx, id, result.describe()).await?;
            }
        }
        result => {
            ctx.queue.give_up(&id);
            dead_letter(ctx, id, result.describe()).await?;
        }
    }

    Ok(())
}

async fn worker_loop(ctx: Arc<CrawlContext>, worker: usize) -> Result<()> {
    tracing::debug!("Worker {} started", worker);

    loop {
        if ctx.stop.is_cancelled() {
            break;
        }

        let notified = ctx.queue.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(target) = ctx.queue.claim() {
            process(&ctx, target).await?;
            continue;
        }

        if ctx.queue.is_drained() {
            break;
        }

        // Nothing claimable: the rest is in flight elsewhere or staged in the sink
        flush(&ctx).await?;
        if ctx.queue.is_drained() {
            break;
        }

        tokio::select! {
            _ = ctx.stop.cancelled() => break,
            _ = &mut notified => {}
            _ = tokio::time::sleep(IDLE_POLL) => {}
        }
    }

    tracing::debug!("Worker {} finished", worker);
    Ok(())
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    config_hash: String,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
    phase: RunPhase,
}

impl Coordinator {
    /// Creates a coordinator in the Idle phase
    ///
    /// `cancel` is the external cancellation signal (Ctrl-C in the binary).
    pub fn new(
        config: Config,
        config_hash: &str,
        transport: Arc<dyn Transport>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            config_hash: config_hash.to_string(),
            transport,
            cancel,
            phase: RunPhase::Idle,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn enter(&mut self, phase: RunPhase) {
        tracing::debug!("Run phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Loads the checkpoint or starts a new run, returning the queue
    fn prepare_queue(
        &self,
        ledger: &mut SqliteLedger,
        checkpoint: &CheckpointStore,
        fresh: bool,
    ) -> Result<WorkQueue> {
        let max_attempts = self.config.crawler.max_attempts;

        if fresh {
            checkpoint.clear()?;
        } else if let Some(state) = checkpoint.load()? {
            if state.config_hash != self.config_hash {
                tracing::warn!(
                    "Configuration changed since run {} was checkpointed; resuming it anyway",
                    state.run_id
                );
            }
            tracing::info!(
                "Resuming run {} with {} of {} targets unfinished",
                state.run_id,
                state.unfinished(),
                state.entries.len()
            );
            ledger.resume_run(state.run_id, &state.config_hash)?;
            return Ok(WorkQueue::from_state(state, max_attempts));
        }

        let run_id = ledger.create_run(&self.config_hash)?;
        let queue = WorkQueue::new(run_id, &self.config_hash, max_attempts);
        let spec = TargetSpec::from_routes(&self.config.routes);
        let added = queue.enqueue_all(generate(&spec)?);
        tracing::info!("Starting run {} with {} targets", run_id, added);

        checkpoint.save(&queue.snapshot())?;
        Ok(queue)
    }

    /// Runs the crawl to completion, cancellation or abort
    ///
    /// Errors raised before any worker starts are returned as `Err`. Once
    /// running, run-level failures end the run in the Aborted phase and are
    /// reported in the outcome.
    pub async fn run(&mut self, fresh: bool) -> Result<CrawlOutcome> {
        let started_at = Utc::now();
        let output_dir = PathBuf::from(&self.config.output.directory);
        std::fs::create_dir_all(&output_dir)?;

        let mut ledger = open_ledger(Path::new(&self.config.output.ledger_path))?;
        let checkpoint = CheckpointStore::new(&self.config.output.state_path);
        let queue = self.prepare_queue(&mut ledger, &checkpoint, fresh)?;
        let run_id = queue.run_id();

        let rule = ExtractionRule::compile(&self.config.extract)?;
        let sink = ResultSink::new(output_path(&output_dir, run_id), rule.field_names());
        let stop = self.cancel.child_token();

        let ctx = Arc::new(CrawlContext {
            run_id,
            url_template: self.config.request.url_template.clone(),
            flush_threshold: self.config.crawler.flush_threshold,
            queue,
            sink: Mutex::new(sink),
            fetcher: RateLimitedFetcher::new(Arc::clone(&self.transport), &self.config, stop.clone()),
            rule,
            checkpoint,
            ledger: Mutex::new(ledger),
            stop,
            fatal: Mutex::new(None),
            zero_yield: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        });

        self.enter(RunPhase::Running);
        let concurrency = self.config.crawler.concurrency as usize;
        let mut workers = JoinSet::new();
        for worker in 0..concurrency {
            workers.spawn(worker_loop(Arc::clone(&ctx), worker));
        }
        tracing::info!("Run {}: {} workers started", run_id, concurrency);

        let mut flush_timer =
            tokio::time::interval(Duration::from_secs(self.config.crawler.flush_interval));
        flush_timer.tick().await;

        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => ctx.fail(e),
                    Some(Err(e)) => ctx.fail(HarvestError::Worker(e.to_string())),
                },
                _ = flush_timer.tick() => {
                    if let Err(e) = flush(&ctx).await {
                        ctx.fail(e);
                    }
                }
            }
        }

        let cancelled = self.cancel.is_cancelled();
        if ctx.has_failed() {
            self.enter(RunPhase::Aborted);
        } else {
            self.enter(RunPhase::Draining);
            if cancelled {
                tracing::info!("Cancelled, draining run {}", run_id);
            }
            if let Err(e) = flush(&ctx).await {
                ctx.fail(e);
                self.enter(RunPhase::Aborted);
            }
        }

        // Persists retry and failure transitions that no flush covered
        if let Err(e) = ctx.save_checkpoint() {
            if self.phase == RunPhase::Aborted {
                tracing::error!("Best-effort checkpoint failed: {}", e);
            } else {
                ctx.fail(e);
                self.enter(RunPhase::Aborted);
            }
        }

        let counts = ctx.queue.counts();
        let status = if self.phase == RunPhase::Aborted {
            RunStatus::Aborted
        } else if counts.pending + counts.in_flight > 0 {
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        };
        let run_counts = RunCounts {
            done: counts.done as u64,
            failed: counts.failed as u64,
            pending: (counts.pending + counts.in_flight) as u64,
            records: relock(&ctx.sink).records_written(),
        };

        let finished = relock(&ctx.ledger).finish_run(run_id, status, &run_counts);
        if let Err(e) = finished {
            if self.phase == RunPhase::Aborted {
                tracing::error!("Could not record run {} in the ledger: {}", run_id, e);
            } else {
                ctx.fail(e.into());
                self.enter(RunPhase::Aborted);
            }
        }

        let dead_letters = relock(&ctx.ledger)
            .dead_letters(run_id)
            .unwrap_or_else(|e| {
                tracing::warn!("Could not read dead letters for run {}: {}", run_id, e);
                Vec::new()
            });

        let status = if self.phase == RunPhase::Aborted {
            RunStatus::Aborted
        } else {
            status
        };

        let summary = RunSummary {
            run_id,
            status,
            started_at,
            finished_at: Utc::now(),
            config_hash: self.config_hash.clone(),
            output_path: relock(&ctx.sink).path().to_path_buf(),
            counts: run_counts,
            zero_yield: ctx.zero_yield.load(Ordering::Relaxed),
            retries: ctx.retries.load(Ordering::Relaxed),
            dead_letters,
        };

        if let Err(e) = generate_markdown_summary(&summary, &summary_path(&output_dir, run_id)) {
            tracing::warn!("Could not write run summary: {}", e);
        }

        let final_phase = self.phase;
        let error = relock(&ctx.fatal).as_ref().map(|e| e.to_string());
        self.enter(RunPhase::Stopped);

        tracing::info!(
            "Run {} {}: {} done, {} failed, {} pending, {} records",
            run_id,
            summary.status.to_db_string(),
            run_counts.done,
            run_counts.failed,
            run_counts.pending,
            run_counts.records
        );

        Ok(CrawlOutcome {
            run_id,
            final_phase,
            cancelled,
            counts,
            summary,
            error,
        })
    }
}

/// Runs a crawl over HTTP with the reqwest transport
///
/// # Example
///
/// ```no_run
/// use fare_harvest::config::load_config_with_hash;
/// use fare_harvest::crawler::run_crawl;
/// use std::path::Path;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("harvest.toml"))?;
/// let outcome = run_crawl(config, &hash, false, CancellationToken::new()).await?;
/// println!("exit code {}", outcome.exit_code());
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(
    config: Config,
    config_hash: &str,
    fresh: bool,
    cancel: CancellationToken,
) -> Result<CrawlOutcome> {
    let transport = ReqwestTransport::from_config(&config.crawler)?;
    let mut coordinator = Coordinator::new(config, config_hash, Arc::new(transport), cancel);
    coordinator.run(fresh).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::crawler::fetcher::{HttpResponse, TransportError};
    use crate::state::EntryStatus;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use url::Url;

    /// Answers every page with a status keyed by path, defaulting to one cell
    struct PathTransport {
        statuses: HashMap<String, u16>,
    }

    #[async_trait]
    impl Transport for PathTransport {
        async fn get(&self, url: &Url, _user_agent: &str) -> std::result::Result<HttpResponse, TransportError> {
            let status_code = self.statuses.get(url.path()).copied().unwrap_or(200);
            Ok(HttpResponse {
                status_code,
                body: format!("<td class=\"fare\">{}</td>", url.path()).into_bytes(),
            })
        }
    }

    fn config(dir: &TempDir, end: &str) -> Config {
        let content = format!(
            r#"
[crawler]
concurrency = 2
max-domain-concurrency = 2
request-spacing = 100
max-attempts = 2
retry-base-delay = 10
max-backoff = 50
flush-threshold = 2
flush-interval = 1

[routes]
origins = ["MAD"]
destinations = ["HND"]
start-date = "2025-06-01"
end-date = "{end}"

[request]
url-template = "http://fares.test/{{origin}}/{{destination}}/{{date}}"
respect-robots = false

[output]
directory = "{dir}/out"
state-path = "{dir}/state.toml"
ledger-path = "{dir}/ledger.db"

[extract]
root = "td.fare"

[[extract.field]]
name = "path"
"#,
            end = end,
            dir = dir.path().display()
        );
        parse_config(&content).unwrap()
    }

    fn coordinator(config: Config, statuses: &[(&str, u16)]) -> Coordinator {
        let transport = PathTransport {
            statuses: statuses
                .iter()
                .map(|(path, code)| (path.to_string(), *code))
                .collect(),
        };
        Coordinator::new(config, "hash", Arc::new(transport), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_run_drains_and_completes() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = coordinator(config(&dir, "2025-06-03"), &[]);
        assert_eq!(coordinator.phase(), RunPhase::Idle);

        let outcome = coordinator.run(false).await.unwrap();

        assert_eq!(coordinator.phase(), RunPhase::Stopped);
        assert_eq!(outcome.final_phase, RunPhase::Draining);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.counts.done, 3);
        assert_eq!(outcome.summary.counts.records, 3);
        assert_eq!(outcome.summary.status, RunStatus::Completed);

        let csv = std::fs::read_to_string(&outcome.summary.output_path).unwrap();
        assert_eq!(csv.lines().count(), 4);
        assert!(csv.starts_with("origin,destination,target_date,path\n"));
        assert!(summary_path(&dir.path().join("out"), outcome.run_id).exists());
    }

    #[tokio::test]
    async fn test_rejected_target_is_dead_lettered() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = coordinator(
            config(&dir, "2025-06-02"),
            &[("/mad/hnd/2025-06-02", 404)],
        );

        let outcome = coordinator.run(false).await.unwrap();
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.counts.done, 1);
        assert_eq!(outcome.counts.failed, 1);
        assert_eq!(outcome.summary.dead_letters.len(), 1);
        assert_eq!(outcome.summary.dead_letters[0].attempts, 1);
        assert_eq!(outcome.summary.dead_letters[0].reason, "rejected (HTTP 404)");
    }

    #[tokio::test]
    async fn test_checkpoint_reflects_final_state() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = coordinator(
            config(&dir, "2025-06-02"),
            &[("/mad/hnd/2025-06-01", 500)],
        );
        let outcome = coordinator.run(false).await.unwrap();

        let state = CheckpointStore::new(dir.path().join("state.toml"))
            .load()
            .unwrap()
            .unwrap();
        assert_eq!(state.run_id, outcome.run_id);

        let first = state
            .entries
            .iter()
            .find(|e| e.date == NaiveDate::from_ymd_opt(2025, 6, 1).unwrap())
            .unwrap();
        assert_eq!(first.status, EntryStatus::Failed);
        assert_eq!(first.attempts, 2);
        assert_eq!(state.unfinished(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_keeps_everything_pending() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let transport = PathTransport {
            statuses: HashMap::new(),
        };
        let mut coordinator = Coordinator::new(
            config(&dir, "2025-06-03"),
            "hash",
            Arc::new(transport),
            cancel.clone(),
        );

        cancel.cancel();
        let outcome = coordinator.run(false).await.unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.exit_code(), 2);
        assert_eq!(outcome.counts.pending, 3);
        assert_eq!(outcome.summary.status, RunStatus::Interrupted);
    }

    #[tokio::test]
    async fn test_fresh_starts_new_run() {
        let dir = TempDir::new().unwrap();
        let first = coordinator(config(&dir, "2025-06-01"), &[])
            .run(false)
            .await
            .unwrap();
        let resumed = coordinator(config(&dir, "2025-06-01"), &[])
            .run(false)
            .await
            .unwrap();
        let fresh = coordinator(config(&dir, "2025-06-01"), &[])
            .run(true)
            .await
            .unwrap();

        assert_eq!(resumed.run_id, first.run_id);
        assert_eq!(resumed.summary.counts.records, 0);
        assert!(fresh.run_id > first.run_id);
        assert_eq!(fresh.summary.counts.records, 1);
    }

    #[tokio::test]
    async fn test_sink_failure_aborts() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "2025-06-02");
        // Occupy the output file path with a directory
        std::fs::create_dir_all(dir.path().join("out/run-0001.csv")).unwrap();

        let outcome = coordinator(config, &[]).run(false).await.unwrap();
        assert_eq!(outcome.final_phase, RunPhase::Aborted);
        assert_eq!(outcome.exit_code(), 1);
        assert!(outcome.error.is_some());
        assert_eq!(outcome.counts.done, 0);
    }

    #[tokio::test]
    async fn test_offload_runs_off_the_async_thread() {
        let caller = std::thread::current().id();
        let ran_on = offload(|| Ok(std::thread::current().id())).await.unwrap();
        assert_ne!(ran_on, caller);

        let err = offload(|| -> Result<()> { Err(HarvestError::Worker("disk full".to_string())) })
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Worker(msg) if msg == "disk full"));
    }

    #[tokio::test]
    async fn test_offload_panic_becomes_worker_error() {
        let err = offload(|| -> Result<()> { panic!("ledger poisoned") })
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Worker(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_on_multi_thread_runtime() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = coordinator(
            config(&dir, "2025-06-04"),
            &[("/mad/hnd/2025-06-03", 404)],
        );

        let outcome = coordinator.run(false).await.unwrap();
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.counts.done, 3);
        assert_eq!(outcome.summary.counts.records, 3);
        assert_eq!(outcome.summary.dead_letters.len(), 1);
    }
}
