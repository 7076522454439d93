use std::sync::Arc;

use borgsched::borg::CommandBuilder;
use borgsched::engine::{EngineOptions, JobExecutor};
use borgsched::store::{FileLedger, MemoryStore, RunLedger, Stores};
use borgsched::types::RunStatus;
use borgsched_test_utils::builders::{JobBuilder, RepositoryBuilder};
use borgsched_test_utils::fake_runner::{FakeRunner, Reply, stats_fixture};
use borgsched_test_utils::init_tracing;

fn executor_with_ledger(runner: &FakeRunner, ledger: Arc<FileLedger>) -> JobExecutor {
    let store = MemoryStore::new(
        vec![RepositoryBuilder::new(1, "main").build()],
        vec![JobBuilder::new(1, "home", 1).build()],
    );
    JobExecutor::new(
        Stores::with_ledger(store, ledger),
        Arc::new(runner.clone()),
        CommandBuilder::default(),
        EngineOptions {
            hostname: "testhost".to_string(),
            ..EngineOptions::default()
        },
    )
}

#[tokio::test]
async fn history_survives_reopening_the_ledger() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("runs.jsonl");

    let runner = FakeRunner::new()
        .on("create", Reply::ok(&stats_fixture("one")))
        .on("create", Reply::fail(2, "disk full"));
    let ledger = Arc::new(FileLedger::open(&path).unwrap());
    let exec = executor_with_ledger(&runner, ledger);

    let first = exec.run(1).await;
    let second = exec.run(1).await;
    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(second.status, RunStatus::Failed);
    drop(exec);

    let reopened = FileLedger::open(&path).unwrap();
    let history = reopened.runs_for_job(1, 50).unwrap();

    assert_eq!(history.len(), 2);
    assert_eq!(history[0], second);
    assert_eq!(history[1], first);
    assert!(history.iter().all(|r| r.status.is_terminal()));
    assert_eq!(history[0].error_message.as_deref(), Some("disk full"));
    assert_eq!(history[1].bytes_processed, Some(1000));
}

#[tokio::test]
async fn run_ids_continue_after_reopen() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.jsonl");
    let runner = FakeRunner::new();

    let exec = executor_with_ledger(&runner, Arc::new(FileLedger::open(&path).unwrap()));
    let first = exec.run(1).await;
    drop(exec);

    let exec = executor_with_ledger(&runner, Arc::new(FileLedger::open(&path).unwrap()));
    let second = exec.run(1).await;

    assert!(second.id > first.id);
    assert_eq!(
        exec.stores().runs.runs_for_job(1, 50).unwrap().len(),
        2
    );
}

#[tokio::test]
async fn torn_trailing_line_is_ignored() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.jsonl");
    let runner = FakeRunner::new();

    let exec = executor_with_ledger(&runner, Arc::new(FileLedger::open(&path).unwrap()));
    let run = exec.run(1).await;
    drop(exec);

    let mut contents = std::fs::read_to_string(&path).unwrap();
    contents.push_str("{\"id\": 99, \"job_id\": 1, \"sta");
    std::fs::write(&path, contents).unwrap();

    let reopened = FileLedger::open(&path).unwrap();
    assert_eq!(reopened.runs_for_job(1, 50).unwrap(), vec![run]);
}
