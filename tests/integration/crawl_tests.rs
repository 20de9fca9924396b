//! Integration tests for the crawler
//!
//! These tests run complete crawls, either against wiremock servers through
//! the real reqwest transport or against a scripted in-memory transport for
//! deterministic failure sequences.

use crate::support::{csv_rows, output_file, state_path, test_config, ScriptedTransport};
use fare_harvest::crawler::{run_crawl, Coordinator, RunPhase, Transport};
use fare_harvest::queue::CheckpointStore;
use fare_harvest::storage::{open_ledger, Ledger, RunStatus};
use fare_harvest::EntryStatus;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn status_of(dir: &TempDir, destination: &str, date: &str) -> (EntryStatus, u32) {
    let state = CheckpointStore::new(state_path(dir))
        .load()
        .expect("checkpoint should load")
        .expect("checkpoint should exist");
    let entry = state
        .entries
        .iter()
        .find(|e| e.destination == destination && e.date.to_string() == date)
        .expect("entry should exist");
    (entry.status, entry.attempts)
}

#[tokio::test]
async fn test_full_crawl_over_http() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("User-agent: *\nDisallow: /fares/mad/nrt/"),
        )
        .mount(&mock_server)
        .await;

    for date in ["2025-06-01", "2025-06-02"] {
        Mock::given(method("GET"))
            .and(path(format!("/fares/mad/hnd/{}", date)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(crate::support::fare_page(date))
                    .insert_header("content-type", "text/html"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &base_url, &["HND", "NRT"], "2025-06-02", 3, true);

    let outcome = run_crawl(config, "hash", false, CancellationToken::new())
        .await
        .expect("run should start");

    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.counts.done, 2);
    assert_eq!(outcome.counts.failed, 2, "NRT is disallowed by robots.txt");
    assert_eq!(outcome.summary.counts.records, 2);

    let rows = csv_rows(&output_file(&dir, outcome.run_id));
    assert_eq!(
        rows,
        vec![
            "MAD,HND,2025-06-01,2025-06-01,412 €",
            "MAD,HND,2025-06-02,2025-06-02,412 €",
        ]
    );

    let reasons: Vec<_> = outcome
        .summary
        .dead_letters
        .iter()
        .map(|d| d.reason.as_str())
        .collect();
    assert_eq!(reasons, vec!["disallowed by robots.txt"; 2]);
}

#[tokio::test]
async fn test_robots_fetched_once_per_run() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>no fares</p>"))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &mock_server.uri(), &["HND"], "2025-06-03", 3, true);

    let outcome = run_crawl(config, "hash", false, CancellationToken::new())
        .await
        .unwrap();

    // Pages without cells are done with no rows
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.counts.done, 3);
    assert_eq!(outcome.summary.zero_yield, 3);
    assert!(csv_rows(&output_file(&dir, outcome.run_id)).is_empty());
}

#[tokio::test]
async fn test_server_errors_retried_until_success() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "http://fares.test", &["HND"], "2025-06-02", 3, false);
    let transport = Arc::new(
        ScriptedTransport::new().script("/fares/mad/hnd/2025-06-01", &[500, 503]),
    );

    let mut coordinator = Coordinator::new(
        config,
        "hash",
        Arc::clone(&transport) as Arc<dyn Transport>,
        CancellationToken::new(),
    );
    let outcome = coordinator.run(false).await.unwrap();

    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.summary.counts.records, 2);
    assert_eq!(outcome.summary.retries, 2);
    assert_eq!(status_of(&dir, "HND", "2025-06-01"), (EntryStatus::Done, 3));
    assert_eq!(status_of(&dir, "HND", "2025-06-02"), (EntryStatus::Done, 1));
    assert_eq!(transport.request_count("/fares/mad/hnd/2025-06-01"), 3);

    let rows = csv_rows(&output_file(&dir, outcome.run_id));
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_rate_limited_target_fails_without_failing_run() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "http://fares.test", &["HND"], "2025-06-02", 3, false);
    let transport = Arc::new(ScriptedTransport::new().always("/fares/mad/hnd/2025-06-01", 429));

    let mut coordinator = Coordinator::new(
        config,
        "hash",
        Arc::clone(&transport) as Arc<dyn Transport>,
        CancellationToken::new(),
    );
    let outcome = coordinator.run(false).await.unwrap();

    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.counts.failed, 1);
    assert_eq!(outcome.counts.done, 1);
    assert_eq!(status_of(&dir, "HND", "2025-06-01"), (EntryStatus::Failed, 3));
    assert_eq!(transport.request_count("/fares/mad/hnd/2025-06-01"), 3);

    let rows = csv_rows(&output_file(&dir, outcome.run_id));
    assert!(rows.iter().all(|r| !r.contains("2025-06-01")));
    assert_eq!(rows.len(), 1);

    let ledger = open_ledger(&dir.path().join("ledger.db")).unwrap();
    let letters = ledger.dead_letters(outcome.run_id).unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].attempts, 3);
    assert_eq!(letters[0].reason, "rate limited (HTTP 429)");

    let run = ledger.get_run(outcome.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.counts.failed, 1);
}

#[tokio::test]
async fn test_rejected_page_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "http://fares.test", &["HND"], "2025-06-01", 3, false);
    let transport = Arc::new(ScriptedTransport::new().always("/fares/mad/hnd/2025-06-01", 410));

    let mut coordinator = Coordinator::new(
        config,
        "hash",
        Arc::clone(&transport) as Arc<dyn Transport>,
        CancellationToken::new(),
    );
    let outcome = coordinator.run(false).await.unwrap();

    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.final_phase, RunPhase::Draining);
    assert_eq!(status_of(&dir, "HND", "2025-06-01"), (EntryStatus::Failed, 1));
    assert_eq!(transport.requests().len(), 1);
}
