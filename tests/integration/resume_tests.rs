//! Checkpoint resume and cancellation

use crate::support::{csv_rows, output_file, state_path, test_config, ScriptedTransport};
use chrono::NaiveDate;
use fare_harvest::crawler::{Coordinator, RunPhase, Transport};
use fare_harvest::queue::{CheckpointStore, CrawlState, StateEntry};
use fare_harvest::storage::{open_ledger, Ledger, RunStatus};
use fare_harvest::EntryStatus;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn entry(day: u32, status: EntryStatus, attempts: u32) -> StateEntry {
    StateEntry {
        origin: "MAD".to_string(),
        destination: "HND".to_string(),
        date: NaiveDate::from_ymd_opt(2025, 6, day).unwrap(),
        status,
        attempts,
    }
}

fn coordinator(config: fare_harvest::Config, transport: &Arc<ScriptedTransport>, cancel: CancellationToken) -> Coordinator {
    Coordinator::new(
        config,
        "hash",
        Arc::clone(transport) as Arc<dyn Transport>,
        cancel,
    )
}

#[tokio::test]
async fn test_resume_processes_only_unfinished_targets() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, "http://fares.test", &["HND"], "2025-06-05", 3, false);

    // Two done, one failed, one pending, one left in flight by a crash
    let state = CrawlState {
        run_id: 7,
        config_hash: "hash".to_string(),
        entries: vec![
            entry(1, EntryStatus::Done, 1),
            entry(2, EntryStatus::Done, 2),
            entry(3, EntryStatus::Failed, 3),
            entry(4, EntryStatus::Pending, 1),
            entry(5, EntryStatus::InFlight, 0),
        ],
    };
    CheckpointStore::new(state_path(&dir)).save(&state).unwrap();

    let transport = Arc::new(ScriptedTransport::new());
    let outcome = coordinator(config, &transport, CancellationToken::new())
        .run(false)
        .await
        .unwrap();

    assert_eq!(outcome.run_id, 7);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.counts.done, 4);
    assert_eq!(outcome.counts.failed, 1);

    let mut requested = transport.requests();
    requested.sort();
    assert_eq!(
        requested,
        vec!["/fares/mad/hnd/2025-06-04", "/fares/mad/hnd/2025-06-05"]
    );

    let rows = csv_rows(&output_file(&dir, 7));
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.contains("2025-06-04") || r.contains("2025-06-05")));

    // The resumed id is known to the ledger, so later runs get larger ids
    let mut ledger = open_ledger(&dir.path().join("ledger.db")).unwrap();
    assert_eq!(ledger.get_run(7).unwrap().status, RunStatus::Completed);
    assert!(ledger.create_run("hash").unwrap() > 7);
}

#[tokio::test]
async fn test_cancel_then_resume_completes_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    // Cancel while the second page is being served; that request completes
    let transport = Arc::new(ScriptedTransport::new().cancel_after(2, cancel.clone()));
    let config = test_config(&dir, "http://fares.test", &["HND"], "2025-06-05", 3, false);
    let first = coordinator(config, &transport, cancel)
        .run(false)
        .await
        .unwrap();

    assert!(first.cancelled);
    assert_eq!(first.final_phase, RunPhase::Draining);
    assert_eq!(first.exit_code(), 2);
    assert_eq!(first.counts.done, 2);
    assert_eq!(first.counts.pending, 3);
    assert_eq!(first.summary.status, RunStatus::Interrupted);

    let state = CheckpointStore::new(state_path(&dir)).load().unwrap().unwrap();
    assert_eq!(state.unfinished(), 3);

    let resumed_transport = Arc::new(ScriptedTransport::new());
    let config = test_config(&dir, "http://fares.test", &["HND"], "2025-06-05", 3, false);
    let second = coordinator(config, &resumed_transport, CancellationToken::new())
        .run(false)
        .await
        .unwrap();

    assert_eq!(second.run_id, first.run_id);
    assert_eq!(second.exit_code(), 0);
    assert_eq!(resumed_transport.requests().len(), 3);

    let first_requests: HashSet<_> = transport.requests().into_iter().collect();
    assert!(resumed_transport
        .requests()
        .iter()
        .all(|p| !first_requests.contains(p)));

    let rows = csv_rows(&output_file(&dir, first.run_id));
    let unique: HashSet<_> = rows.iter().collect();
    assert_eq!(rows.len(), 5);
    assert_eq!(unique.len(), 5);
}

#[tokio::test]
async fn test_fresh_discards_checkpoint() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let transport = Arc::new(ScriptedTransport::new().cancel_after(1, cancel.clone()));
    let config = test_config(&dir, "http://fares.test", &["HND"], "2025-06-03", 3, false);
    let first = coordinator(config, &transport, cancel)
        .run(false)
        .await
        .unwrap();
    assert_eq!(first.exit_code(), 2);

    let transport = Arc::new(ScriptedTransport::new());
    let config = test_config(&dir, "http://fares.test", &["HND"], "2025-06-03", 3, false);
    let fresh = coordinator(config, &transport, CancellationToken::new())
        .run(true)
        .await
        .unwrap();

    assert!(fresh.run_id > first.run_id);
    assert_eq!(fresh.exit_code(), 0);
    assert_eq!(transport.requests().len(), 3);
    assert_eq!(csv_rows(&output_file(&dir, fresh.run_id)).len(), 3);
    assert_eq!(csv_rows(&output_file(&dir, first.run_id)).len(), 1);
}
