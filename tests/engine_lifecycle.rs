use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use borgsched::borg::CommandBuilder;
use borgsched::engine::{ALREADY_RUNNING, EngineOptions, JobExecutor, PRUNE_SKIPPED_NOTE};
use borgsched::errors::{BorgschedError, Result};
use borgsched::exec::CommandOutput;
use borgsched::model::{BackupJob, RunRecord};
use borgsched::store::{MemoryStore, RunLedger, Stores};
use borgsched::types::{JobId, RunId, RunStatus};
use borgsched_test_utils::builders::{JobBuilder, RepositoryBuilder, memory_stores};
use borgsched_test_utils::fake_runner::{FakeRunner, Reply, stats_fixture};
use borgsched_test_utils::{init_tracing, with_timeout};

fn options() -> EngineOptions {
    EngineOptions {
        hostname: "testhost".to_string(),
        ..EngineOptions::default()
    }
}

fn executor(runner: &FakeRunner, job: BackupJob, options: EngineOptions) -> JobExecutor {
    let repo = RepositoryBuilder::new(1, "main").build();
    JobExecutor::new(
        memory_stores(vec![repo], vec![job]),
        Arc::new(runner.clone()),
        CommandBuilder::default(),
        options,
    )
}

fn job() -> JobBuilder {
    JobBuilder::new(1, "home", 1)
}

#[tokio::test]
async fn successful_backup_records_archive_and_stats() {
    init_tracing();
    let runner = FakeRunner::new().on("create", Reply::ok(&stats_fixture("testhost-daily")));
    let exec = executor(&runner, job().keep_daily(7).build(), options());

    let run = with_timeout(exec.run(1)).await;

    assert_eq!(run.status, RunStatus::Success);
    assert!(run.finished_at.is_some());
    assert!(run.duration_seconds.is_some_and(|d| d >= 0));
    assert_eq!(run.error_message, None);
    assert_eq!(run.bytes_processed, Some(1000));
    assert_eq!(run.bytes_deduplicated, Some(400));

    let archive_id = run.archive_id.expect("archive recorded");
    let archive = exec.stores().archives.get_archive(archive_id).unwrap().unwrap();
    assert_eq!(archive.name, "testhost-daily");
    assert_eq!(archive.repository_id, 1);
    assert_eq!(archive.original_size, 1000);
    assert_eq!(archive.compressed_size, 600);
    assert_eq!(archive.deduplicated_size, 400);
    assert_eq!(archive.nfiles, 10);
    assert_eq!(archive.duration, Some(300.0));
    assert_eq!(archive.hostname.as_deref(), Some("testhost"));
    assert!(archive.stats.as_deref().is_some_and(|s| s.contains("\"nfiles\":10")));

    assert_eq!(runner.call_keys(), vec!["create", "prune", "compact"]);

    let stored = exec.stores().runs.get_run(run.id).unwrap().unwrap();
    assert_eq!(stored, run);
    let job = exec.stores().jobs.get_job(1).unwrap().unwrap();
    assert_eq!(job.last_status, Some(RunStatus::Success));
    assert_eq!(job.last_run_at, Some(run.started_at));
}

#[tokio::test]
async fn create_invocation_uses_job_settings() {
    init_tracing();
    let runner = FakeRunner::new();
    let job = job()
        .sources(&["/home", "/etc"])
        .exclude("*.tmp")
        .archive_pattern("{hostname}-nightly")
        .build();
    let exec = executor(&runner, job, options());

    exec.run(1).await;

    let calls = runner.calls();
    let create = &calls[0];
    assert_eq!(create.program, "borg");
    assert_eq!(create.args[0], "create");
    assert!(create.args.contains(&"--compression=lz4".to_string()));
    assert!(create.args.contains(&"--stats".to_string()));
    assert!(create.args.contains(&"--json".to_string()));
    assert!(create.args.windows(2).any(|w| w == ["--exclude", "*.tmp"]));
    let tail: Vec<&str> = create.args.iter().rev().take(3).rev().map(String::as_str).collect();
    assert_eq!(tail, vec!["/srv/borg/main::testhost-nightly", "/home", "/etc"]);
    assert_eq!(create.timeout, options().backup_timeout);
}

#[tokio::test]
async fn failed_backup_creates_no_archive() {
    init_tracing();
    let runner = FakeRunner::new().on("create", Reply::fail(2, "Repository locked\n"));
    let exec = executor(&runner, job().keep_daily(7).build(), options());

    let run = exec.run(1).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.archive_id, None);
    assert_eq!(run.error_message.as_deref(), Some("Repository locked"));
    assert!(exec.stores().archives.archives_for_repository(1).unwrap().is_empty());
    // Retention still runs after a failed backup by default.
    assert_eq!(runner.call_keys(), vec!["create", "prune", "compact"]);
    let job = exec.stores().jobs.get_job(1).unwrap().unwrap();
    assert_eq!(job.last_status, Some(RunStatus::Failed));
}

#[tokio::test]
async fn retention_can_be_skipped_after_failed_backup() {
    init_tracing();
    let runner = FakeRunner::new().on("create", Reply::fail(2, "boom"));
    let opts = EngineOptions {
        retention_after_failed_backup: false,
        ..options()
    };
    let exec = executor(&runner, job().keep_daily(7).build(), opts);

    let run = exec.run(1).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(runner.call_keys(), vec!["create"]);
    assert!(run.log_output.contains("Prune skipped: backup failed"));
}

#[tokio::test]
async fn hook_failures_do_not_gate_the_backup() {
    init_tracing();
    let runner = FakeRunner::new()
        .on_script("exit 3", Reply::Output(CommandOutput::from_exit(3, "pre out\n".into(), "pre err\n".into())))
        .on_script("notify-send done", Reply::fail(127, "notify-send: not found"))
        .on("create", Reply::ok(&stats_fixture("a")));
    let job = job().pre_hook("exit 3").post_hook("notify-send done").build();
    let exec = executor(&runner, job, options());

    let run = exec.run(1).await;

    assert_eq!(run.status, RunStatus::Success);
    assert!(run.archive_id.is_some());
    assert_eq!(
        runner.call_keys(),
        vec!["sh: exit 3", "create", "sh: notify-send done"]
    );

    let log = &run.log_output;
    assert!(log.contains("Pre-backup script output:\npre out\npre err"), "{log}");
    assert!(log.contains("Warning: Pre-backup script exited with code 3"), "{log}");
    assert!(log.contains("Post-backup script output:"), "{log}");
    assert!(log.contains("Warning: Post-backup script exited with code 127"), "{log}");
    let pre = log.find("Pre-backup").unwrap();
    let post = log.find("Post-backup").unwrap();
    assert!(pre < post);
}

#[tokio::test]
async fn hooks_run_with_the_hook_timeout() {
    init_tracing();
    let runner = FakeRunner::new();
    let opts = EngineOptions {
        hook_timeout: Duration::from_secs(7),
        ..options()
    };
    let exec = executor(&runner, job().pre_hook("echo hi").build(), opts);

    exec.run(1).await;

    let hook = &runner.calls()[0];
    assert_eq!(hook.args.last().map(String::as_str), Some("echo hi"));
    assert_eq!(hook.timeout, Duration::from_secs(7));
}

#[tokio::test]
async fn prune_is_skipped_without_retention_policies() {
    init_tracing();
    let runner = FakeRunner::new().on("create", Reply::ok(&stats_fixture("a")));
    let exec = executor(&runner, job().build(), options());

    let run = exec.run(1).await;

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(runner.call_keys(), vec!["create"]);
    assert!(run.log_output.contains(PRUNE_SKIPPED_NOTE));
}

#[tokio::test]
async fn auto_prune_disabled_skips_retention_silently() {
    init_tracing();
    let runner = FakeRunner::new();
    let exec = executor(&runner, job().keep_daily(7).auto_prune(false).build(), options());

    let run = exec.run(1).await;

    assert_eq!(runner.call_keys(), vec!["create"]);
    assert!(!run.log_output.contains("Prune"));
}

#[tokio::test]
async fn prune_failure_keeps_the_run_successful() {
    init_tracing();
    let runner = FakeRunner::new()
        .on("create", Reply::ok(&stats_fixture("a")))
        .on("prune", Reply::fail(2, "Failed to create/acquire the lock"));
    let exec = executor(&runner, job().keep_daily(7).build(), options());

    let run = exec.run(1).await;

    assert_eq!(run.status, RunStatus::Success);
    assert!(run.archive_id.is_some());
    assert_eq!(runner.call_keys(), vec!["create", "prune"]);
    assert!(run.log_output.contains("Prune error:\nFailed to create/acquire the lock"));
}

#[tokio::test]
async fn compact_failure_is_logged_only() {
    init_tracing();
    let runner = FakeRunner::new()
        .on("create", Reply::ok(&stats_fixture("a")))
        .on("prune", Reply::ok("pruned 2 archives\n"))
        .on("compact", Reply::fail(1, "compaction failed"));
    let exec = executor(&runner, job().keep_weekly(4).build(), options());

    let run = exec.run(1).await;

    assert_eq!(run.status, RunStatus::Success);
    assert!(run.log_output.contains("Prune output:\npruned 2 archives"));
    assert!(run.log_output.contains("Compact error:\ncompaction failed"));
    let prune = &runner.calls()[1];
    assert!(prune.args.windows(2).any(|w| w == ["--keep-weekly", "4"]));
    assert_eq!(prune.timeout, options().maintenance_timeout);
}

#[tokio::test]
async fn missing_json_is_a_warning_not_a_failure() {
    init_tracing();
    let runner = FakeRunner::new().on("create", Reply::ok(""));
    let exec = executor(&runner, job().build(), options());

    let run = exec.run(1).await;

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.archive_id, None);
    assert_eq!(run.bytes_processed, None);
    assert!(run.log_output.contains("Warning: No JSON output from borg create"));
}

#[tokio::test]
async fn malformed_stats_are_a_warning_not_a_failure() {
    init_tracing();
    for stdout in ["{not json", r#"{"archive": {"name": "x"}}"#] {
        let runner = FakeRunner::new().on("create", Reply::ok(stdout));
        let exec = executor(&runner, job().build(), options());

        let run = exec.run(1).await;

        assert_eq!(run.status, RunStatus::Success, "stdout: {stdout}");
        assert_eq!(run.archive_id, None, "stdout: {stdout}");
        assert!(
            run.log_output.contains("Warning: Could not parse backup stats"),
            "{}",
            run.log_output
        );
        assert!(exec.stores().archives.archives_for_repository(1).unwrap().is_empty());
    }
}

#[tokio::test]
async fn backup_timeout_fails_the_run() {
    init_tracing();
    let runner = FakeRunner::new().on(
        "create",
        Reply::Delayed(Duration::from_secs(30), CommandOutput::from_exit(0, String::new(), String::new())),
    );
    let opts = EngineOptions {
        backup_timeout: Duration::from_millis(200),
        ..options()
    };
    let exec = executor(&runner, job().build(), opts);

    let started = Instant::now();
    let run = with_timeout(exec.run(1)).await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_message.as_deref(), Some("borg create timed out after 200ms"));
    assert!(run.log_output.contains("timed out"));
}

#[tokio::test]
async fn panic_during_run_is_recorded_as_failure() {
    init_tracing();
    let runner = FakeRunner::new().on("create", Reply::Panic("runner exploded".into()));
    let exec = executor(&runner, job().build(), options());

    let run = with_timeout(exec.run(1)).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.finished_at.is_some());
    assert_eq!(run.error_message.as_deref(), Some("internal error: runner exploded"));
    let stored = exec.stores().runs.get_run(run.id).unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    let job = exec.stores().jobs.get_job(1).unwrap().unwrap();
    assert_eq!(job.last_status, Some(RunStatus::Failed));
}

#[tokio::test]
async fn missing_repository_fails_but_post_hook_runs() {
    init_tracing();
    let runner = FakeRunner::new();
    let job = JobBuilder::new(1, "orphan", 99).post_hook("echo cleanup").build();
    let exec = executor(&runner, job, options());

    let run = exec.run(1).await;

    assert_eq!(run.status, RunStatus::Failed);
    let message = run.error_message.unwrap_or_default();
    assert!(message.contains("Repository not found: 99"), "{message}");
    assert_eq!(runner.call_keys(), vec!["sh: echo cleanup"]);
    assert!(run.log_output.contains("Error: Repository not found: 99"));
}

#[tokio::test]
async fn job_without_source_paths_fails_before_borg() {
    init_tracing();
    let runner = FakeRunner::new();
    let job = job().sources(&[" "]).post_hook("echo cleanup").build();
    let exec = executor(&runner, job, options());

    let run = exec.run(1).await;

    assert_eq!(run.status, RunStatus::Failed);
    let message = run.error_message.unwrap_or_default();
    assert!(message.contains("no source paths"), "{message}");
    assert_eq!(runner.count("create"), 0);
    assert_eq!(runner.call_keys(), vec!["sh: echo cleanup"]);
}

#[tokio::test]
async fn blank_source_entries_are_not_passed_to_borg() {
    init_tracing();
    let runner = FakeRunner::new();
    let exec = executor(&runner, job().sources(&["/home", "", "/etc"]).build(), options());

    let run = exec.run(1).await;

    assert_eq!(run.status, RunStatus::Success);
    let create = &runner.calls()[0];
    assert!(create.args.ends_with(&["/home".to_string(), "/etc".to_string()]));
    assert!(!create.args.iter().any(|a| a.trim().is_empty()));
}

/// Run ledger whose first `update_run` calls fail.
struct FlakyLedger {
    inner: MemoryStore,
    failing_updates: AtomicUsize,
}

impl RunLedger for FlakyLedger {
    fn create_run(&self, run: RunRecord) -> Result<RunRecord> {
        self.inner.create_run(run)
    }

    fn update_run(&self, run: &RunRecord) -> Result<()> {
        let remaining = self.failing_updates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_updates.store(remaining - 1, Ordering::SeqCst);
            return Err(BorgschedError::StoreError("disk quota exceeded".to_string()));
        }
        self.inner.update_run(run)
    }

    fn get_run(&self, id: RunId) -> Result<Option<RunRecord>> {
        self.inner.get_run(id)
    }

    fn runs_for_job(&self, job_id: JobId, limit: usize) -> Result<Vec<RunRecord>> {
        self.inner.runs_for_job(job_id, limit)
    }
}

#[tokio::test]
async fn ledger_hiccup_after_backup_keeps_the_run_successful() {
    init_tracing();
    let runner = FakeRunner::new().on("create", Reply::ok(&stats_fixture("home-1")));
    let store = MemoryStore::new(
        vec![RepositoryBuilder::new(1, "main").build()],
        vec![job().keep_daily(7).build()],
    );
    let ledger = Arc::new(FlakyLedger {
        inner: MemoryStore::default(),
        failing_updates: AtomicUsize::new(1),
    });
    let exec = JobExecutor::new(
        Stores::with_ledger(store, ledger),
        Arc::new(runner.clone()),
        CommandBuilder::default(),
        options(),
    );

    let run = exec.run(1).await;

    assert_eq!(run.status, RunStatus::Success);
    assert!(run.archive_id.is_some());
    assert_eq!(run.error_message, None);
    assert!(run.log_output.contains("Could not persist backup progress"), "{}", run.log_output);
    assert_eq!(runner.call_keys(), vec!["create", "prune", "compact"]);
    assert_eq!(exec.stores().runs.get_run(run.id).unwrap(), Some(run));
}

#[tokio::test]
async fn unknown_job_is_rejected_without_ledger_entry() {
    init_tracing();
    let runner = FakeRunner::new();
    let exec = executor(&runner, job().build(), options());

    let run = exec.run(42).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_message.as_deref(), Some("Backup job not found: 42"));
    assert!(runner.calls().is_empty());
    assert!(exec.stores().runs.runs_for_job(42, 10).unwrap().is_empty());
}

#[tokio::test]
async fn exclusive_runs_reject_overlap() {
    init_tracing();
    let runner = FakeRunner::new().on(
        "create",
        Reply::Delayed(Duration::from_millis(300), CommandOutput::from_exit(0, String::new(), String::new())),
    );
    let opts = EngineOptions {
        exclusive_runs: true,
        ..options()
    };
    let exec = executor(&runner, job().build(), opts);

    let (a, b) = with_timeout(async { tokio::join!(exec.run(1), exec.run(1)) }).await;

    let mut statuses = vec![a.status, b.status];
    statuses.sort_by_key(|s| s.as_str());
    assert_eq!(statuses, vec![RunStatus::Failed, RunStatus::Success]);
    let rejected = if a.status == RunStatus::Failed { &a } else { &b };
    assert_eq!(rejected.error_message.as_deref(), Some(ALREADY_RUNNING));
    assert_eq!(runner.count("create"), 1);
    assert_eq!(exec.stores().runs.runs_for_job(1, 10).unwrap().len(), 1);

    // Once the first run is done the job can run again.
    let again = exec.run(1).await;
    assert_eq!(again.status, RunStatus::Success);
}

#[tokio::test]
async fn overlapping_runs_are_allowed_by_default() {
    init_tracing();
    let runner = FakeRunner::new().on(
        "create",
        Reply::Delayed(Duration::from_millis(200), CommandOutput::from_exit(0, String::new(), String::new())),
    );
    let exec = executor(&runner, job().build(), options());

    let (a, b) = with_timeout(async { tokio::join!(exec.run(1), exec.run(1)) }).await;

    assert_eq!(a.status, RunStatus::Success);
    assert_eq!(b.status, RunStatus::Success);
    assert_ne!(a.id, b.id);
    assert_eq!(runner.count("create"), 2);
}

#[tokio::test]
async fn history_is_newest_first() {
    init_tracing();
    let runner = FakeRunner::new()
        .on("create", Reply::fail(2, "first fails"))
        .on("create", Reply::ok(&stats_fixture("second")));
    let exec = executor(&runner, job().build(), options());

    let first = exec.run(1).await;
    let second = exec.run(1).await;

    let history = exec.stores().runs.runs_for_job(1, 50).unwrap();
    let ids: Vec<_> = history.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
    assert_eq!(history[0].status, RunStatus::Success);
    assert_eq!(history[1].status, RunStatus::Failed);
    assert_eq!(exec.stores().runs.runs_for_job(1, 1).unwrap().len(), 1);
}
