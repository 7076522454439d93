// src/engine/executor.rs

//! One backup job run, end to end.
//!
//! ```text
//! pre-hook -> borg create -> archive record -> prune -> compact -> post-hook
//! ```
//!
//! Hooks and retention never decide the run's status; only `borg create`
//! does. Whatever happens inside the lifecycle (errors, panics) the run
//! record ends in a terminal state.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::borg::command::{CommandBuilder, CreateOptions};
use crate::borg::output::{self, CreateResult};
use crate::errors::BorgschedError;
use crate::exec::{CommandOutput, CommandSpec, Decoded, OutputMode, ProcessRunner, format_duration};
use crate::model::{ArchiveRecord, BackupJob, Repository, RunRecord};
use crate::store::Stores;
use crate::types::{JobId, RunStatus};

use super::archive_name::render_archive_name;
use super::run_log::RunLog;

pub const DEFAULT_BACKUP_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAINTENANCE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 1800;

pub const PRUNE_SKIPPED_NOTE: &str = "Prune skipped: No retention policies configured";
pub const ALREADY_RUNNING: &str = "job already running";

/// Tunables for [`JobExecutor`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub backup_timeout: Duration,
    pub hook_timeout: Duration,
    pub maintenance_timeout: Duration,
    /// Seconds between checkpoints during `borg create`.
    pub checkpoint_interval: u64,
    /// Substituted for `{hostname}` and recorded on archives.
    pub hostname: String,
    /// Run prune/compact even when the backup failed.
    pub retention_after_failed_backup: bool,
    /// Refuse to start a run while another run of the same job is active.
    pub exclusive_runs: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            backup_timeout: DEFAULT_BACKUP_TIMEOUT,
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
            maintenance_timeout: DEFAULT_MAINTENANCE_TIMEOUT,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            hostname: system_hostname(),
            retention_after_failed_backup: true,
            exclusive_runs: false,
        }
    }
}

/// Host name of the machine, or `localhost` if it cannot be determined.
pub fn system_hostname() -> String {
    sysinfo::System::host_name()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Mutable state of a run in progress.
struct RunContext {
    run: RunRecord,
    log: RunLog,
}

impl RunContext {
    fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.log.note(format!("Error: {message}"));
        self.run.error_message = Some(message);
    }

    fn snapshot(&self) -> RunRecord {
        let mut run = self.run.clone();
        run.log_output = self.log.as_str().to_string();
        run
    }
}

/// Removes a job from the active set when the run ends.
struct ActiveRun<'a> {
    active: &'a Mutex<HashSet<JobId>>,
    job_id: JobId,
}

impl<'a> ActiveRun<'a> {
    fn acquire(active: &'a Mutex<HashSet<JobId>>, job_id: JobId) -> Option<Self> {
        let inserted = active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id);
        inserted.then_some(Self { active, job_id })
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

/// Executes backup job runs against a set of stores and a process runner.
pub struct JobExecutor {
    stores: Stores,
    runner: Arc<dyn ProcessRunner>,
    builder: CommandBuilder,
    options: EngineOptions,
    active: Mutex<HashSet<JobId>>,
}

impl JobExecutor {
    pub fn new(
        stores: Stores,
        runner: Arc<dyn ProcessRunner>,
        builder: CommandBuilder,
        options: EngineOptions,
    ) -> Self {
        Self {
            stores,
            runner,
            builder,
            options,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Run job `job_id` once and return its terminal run record.
    ///
    /// Runs that could not be started (unknown job, exclusive run already in
    /// progress, ledger unavailable) come back as a `failed` record that was
    /// never written to the ledger.
    pub async fn run(&self, job_id: JobId) -> RunRecord {
        let job = match self.stores.jobs.get_job(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id, "backup job not found");
                return RunRecord::rejected(job_id, BorgschedError::JobNotFound(job_id).to_string());
            }
            Err(e) => {
                error!(job_id, error = %e, "failed to load backup job");
                return RunRecord::rejected(job_id, format!("failed to load backup job: {e}"));
            }
        };

        let _active = if self.options.exclusive_runs {
            match ActiveRun::acquire(&self.active, job_id) {
                Some(guard) => Some(guard),
                None => {
                    info!(job = %job.name, "run requested while another run is active; rejecting");
                    return RunRecord::rejected(job_id, ALREADY_RUNNING);
                }
            }
        } else {
            None
        };

        let started_at = Utc::now();
        let run = match self.stores.runs.create_run(RunRecord::started(job_id, started_at)) {
            Ok(run) => run,
            Err(e) => {
                error!(job = %job.name, error = %e, "failed to create run record");
                return RunRecord::rejected(job_id, format!("failed to create run record: {e}"));
            }
        };
        if let Err(e) = self.stores.jobs.mark_run_started(job_id, started_at) {
            warn!(job = %job.name, error = %e, "failed to update job run summary");
        }

        info!(job = %job.name, run_id = run.id, "starting backup job");

        let mut ctx = RunContext {
            run,
            log: RunLog::new(),
        };

        let outcome = AssertUnwindSafe(self.lifecycle(&job, &mut ctx))
            .catch_unwind()
            .await;

        let status = match outcome {
            Ok(true) => RunStatus::Success,
            Ok(false) => RunStatus::Failed,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(job = %job.name, run_id = ctx.run.id, panic = %message, "backup run panicked");
                ctx.fail(format!("internal error: {message}"));
                RunStatus::Failed
            }
        };

        self.finalize(&job, ctx, status)
    }

    fn finalize(&self, job: &BackupJob, ctx: RunContext, status: RunStatus) -> RunRecord {
        let mut run = ctx.snapshot();
        run.finish(status, Utc::now());

        if let Err(e) = self.stores.runs.update_run(&run) {
            error!(job = %job.name, run_id = run.id, error = %e, "failed to persist finished run");
        }
        if let Err(e) = self.stores.jobs.set_last_status(job.id, status) {
            warn!(job = %job.name, error = %e, "failed to update job status");
        }

        info!(
            job = %job.name,
            run_id = run.id,
            status = %status,
            duration_seconds = run.duration_seconds.unwrap_or_default(),
            archive_id = ?run.archive_id,
            "backup job finished"
        );
        run
    }

    /// Returns `true` iff the backup step succeeded.
    async fn lifecycle(&self, job: &BackupJob, ctx: &mut RunContext) -> bool {
        if let Some(script) = non_blank(job.pre_backup_script.as_deref()) {
            self.run_hook(job, "Pre-backup", script, ctx).await;
        }

        let backup_ok = match self.backup_phase(job, ctx).await {
            Ok(ok) => ok,
            Err(e) => {
                let message = format!("{e:#}");
                error!(job = %job.name, run_id = ctx.run.id, error = %message, "backup run failed");
                ctx.fail(message);
                false
            }
        };

        if let Some(script) = non_blank(job.post_backup_script.as_deref()) {
            self.run_hook(job, "Post-backup", script, ctx).await;
        }

        backup_ok
    }

    async fn backup_phase(&self, job: &BackupJob, ctx: &mut RunContext) -> Result<bool> {
        let source_paths = job.backup_sources();
        if source_paths.is_empty() {
            bail!("job '{}' has no source paths to back up", job.name);
        }

        let repo = self
            .stores
            .repositories
            .get_repository(job.repository_id)?
            .ok_or(BorgschedError::RepositoryNotFound(job.repository_id))?;

        let archive_name =
            render_archive_name(&job.archive_name_pattern, &self.options.hostname, Utc::now())
                .with_context(|| format!("rendering archive name for job '{}'", job.name))?;

        let cmd = self.builder.create(
            &repo,
            &CreateOptions {
                archive_name: &archive_name,
                source_paths: &source_paths,
                exclusion_patterns: &job.exclusion_patterns,
                compression: &job.compression,
                checkpoint_interval: self.options.checkpoint_interval,
            },
        );
        info!(job = %job.name, run_id = ctx.run.id, archive = %archive_name, command = %cmd, "running borg create");

        let out = self
            .runner
            .run(CommandSpec::from_borg(cmd, self.options.backup_timeout))
            .await;
        ctx.log.output(&out.combined());

        let backup_ok = if out.success {
            self.record_archive(job, &repo, &archive_name, &out, ctx);
            true
        } else {
            let message = backup_failure_message(&out, self.options.backup_timeout);
            error!(job = %job.name, run_id = ctx.run.id, exit_code = out.exit_code, error = %message, "borg create failed");
            ctx.run.error_message = Some(message);
            false
        };

        if let Err(e) = self.stores.runs.update_run(&ctx.snapshot()) {
            warn!(job = %job.name, run_id = ctx.run.id, error = %e, "failed to persist backup progress");
            ctx.log.warning(format!("Could not persist backup progress: {e}"));
        }

        if job.auto_prune {
            if backup_ok || self.options.retention_after_failed_backup {
                self.apply_retention(job, &repo, ctx).await;
            } else {
                ctx.log.note("Prune skipped: backup failed");
            }
        }

        Ok(backup_ok)
    }

    /// Create the archive record from `borg create --json` output.
    ///
    /// Output that cannot be interpreted, or an archive that cannot be
    /// stored, is logged as a warning on the run; the run stays successful.
    fn record_archive(
        &self,
        job: &BackupJob,
        repo: &Repository,
        archive_name: &str,
        out: &CommandOutput,
        ctx: &mut RunContext,
    ) {
        let doc = match out.decode(OutputMode::Json) {
            Decoded::Document(doc) => doc,
            Decoded::Malformed(e) => {
                warn!(job = %job.name, error = %e, "could not parse borg create output");
                ctx.log.warning(format!("Could not parse backup stats: {e}"));
                return;
            }
            _ => {
                warn!(job = %job.name, stderr = %truncate(&out.stderr, 200), "no JSON output from borg create");
                ctx.log.warning("No JSON output from borg create");
                return;
            }
        };

        let raw = doc.to_string();
        let CreateResult { archive: created } = match output::parse_create(doc) {
            Ok(result) => result,
            Err(e) => {
                warn!(job = %job.name, error = %e, "unexpected borg create output");
                ctx.log.warning(format!("Could not parse backup stats: {e}"));
                return;
            }
        };

        let stats = created.stats;
        let record = ArchiveRecord {
            id: 0,
            repository_id: repo.id,
            name: created
                .name
                .clone()
                .unwrap_or_else(|| archive_name.to_string()),
            borg_id: created.id.clone(),
            start_time: created.start.as_deref().and_then(output::parse_borg_timestamp),
            end_time: created.end.as_deref().and_then(output::parse_borg_timestamp),
            duration: Some(created.duration),
            original_size: stats.original_size,
            compressed_size: stats.compressed_size,
            deduplicated_size: stats.deduplicated_size,
            nfiles: stats.nfiles,
            hostname: Some(self.options.hostname.clone()),
            username: None,
            comment: None,
            stats: Some(raw),
            created_at: Utc::now(),
        };

        ctx.run.bytes_processed = Some(stats.original_size);
        ctx.run.bytes_deduplicated = Some(stats.deduplicated_size);

        match self.stores.archives.create_archive(record) {
            Ok(archive) => {
                debug!(job = %job.name, archive_id = archive.id, archive = %archive.name, "archive recorded");
                ctx.run.archive_id = Some(archive.id);
            }
            Err(e) => {
                warn!(job = %job.name, error = %e, "failed to record archive");
                ctx.log.warning(format!("Could not record archive: {e}"));
            }
        }
    }

    /// `borg prune`, then `borg compact` if prune succeeded. Never affects the
    /// run status.
    async fn apply_retention(&self, job: &BackupJob, repo: &Repository, ctx: &mut RunContext) {
        if job.retention.is_empty() {
            info!(job = %job.name, "skipping prune: no retention policies configured");
            ctx.log.note(PRUNE_SKIPPED_NOTE);
            return;
        }

        let prune = self.builder.prune(repo, &job.retention);
        info!(job = %job.name, command = %prune, "running borg prune");
        let out = self
            .runner
            .run(CommandSpec::from_borg(prune, self.options.maintenance_timeout))
            .await;

        if !out.success {
            warn!(job = %job.name, exit_code = out.exit_code, stderr = %out.stderr.trim(), "prune failed");
            ctx.log.section("Prune error", &out.stderr);
            return;
        }
        ctx.log.section("Prune output", &out.combined());

        let compact = self.builder.compact(repo);
        info!(job = %job.name, command = %compact, "running borg compact");
        let out = self
            .runner
            .run(CommandSpec::from_borg(compact, self.options.maintenance_timeout))
            .await;

        if out.success {
            ctx.log.section("Compact output", &out.combined());
        } else {
            warn!(job = %job.name, exit_code = out.exit_code, stderr = %out.stderr.trim(), "compact failed");
            ctx.log.section("Compact error", &out.stderr);
        }
    }

    /// Run a user hook through the shell. Failures are logged, never fatal.
    async fn run_hook(&self, job: &BackupJob, label: &str, script: &str, ctx: &mut RunContext) {
        info!(job = %job.name, hook = label, script = %truncate(script, 50), "running hook script");
        let out = self
            .runner
            .run(CommandSpec::shell(script, self.options.hook_timeout))
            .await;

        ctx.log.section(
            &format!("{label} script output"),
            &format!("{}\n{}", out.stdout.trim_end(), out.stderr.trim_end()),
        );
        if !out.success {
            warn!(job = %job.name, hook = label, exit_code = out.exit_code, timed_out = out.timed_out, "hook script failed");
            ctx.log.warning(format!(
                "{label} script exited with code {}",
                out.exit_code
            ));
        }
    }
}

fn backup_failure_message(out: &CommandOutput, timeout: Duration) -> String {
    if out.timed_out {
        return format!("borg create timed out after {}", format_duration(timeout));
    }
    let stderr = out.stderr.trim();
    if stderr.is_empty() {
        format!("borg create exited with code {}", out.exit_code)
    } else {
        stderr.to_string()
    }
}

fn non_blank(script: Option<&str>) -> Option<&str> {
    script.filter(|s| !s.trim().is_empty())
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
