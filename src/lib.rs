// src/lib.rs

pub mod borg;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod model;
pub mod schedule;
pub mod store;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::borg::{BorgClient, CommandBuilder};
use crate::cli::{CliArgs, Command};
use crate::config::{ConfigFile, config_root_dir, load_and_validate};
use crate::engine::JobExecutor;
use crate::exec::{CommandOutput, ProcessRunner, TokioProcessRunner};
use crate::model::{BackupJob, Repository, RunRecord};
use crate::schedule::{CronSchedule, Scheduler};
use crate::store::{FileLedger, MemoryStore, Stores};
use crate::types::LedgerStorage;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - stores (in memory, optionally with a file-backed run ledger)
/// - process runner, job executor and scheduler
/// - Ctrl-C handling for the daemon
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config from {config_path:?}"))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner::new());
    let builder = CommandBuilder::new(cfg.settings.borg_binary.clone());
    let stores = build_stores(&cfg, &config_path)?;
    let executor = Arc::new(JobExecutor::new(
        stores,
        runner.clone(),
        builder.clone(),
        cfg.settings.engine_options(),
    ));
    let client = BorgClient::new(builder, runner, cfg.settings.maintenance_timeout);

    match args.command.unwrap_or(Command::Daemon) {
        Command::Daemon => run_daemon(executor).await,
        Command::Run { job } => {
            let job = find_job(&cfg, &job)?;
            let record = executor.run(job.id).await;
            print_json(&record)
        }
        Command::History { job, limit } => {
            let job = find_job(&cfg, &job)?;
            let runs = executor.stores().runs.runs_for_job(job.id, limit)?;
            print_history(&runs);
            Ok(())
        }
        Command::Init {
            repository,
            encryption,
        } => {
            let repo = find_repository(&cfg, &repository)?;
            let out = client.init_repository(repo, encryption).await;
            report_command("borg init", &out)
        }
        Command::Archives { repository } => {
            let repo = find_repository(&cfg, &repository)?;
            let list = client.list_archives(repo).await?;
            for archive in &list.archives {
                let time = archive.time.as_deref().or(archive.start.as_deref());
                println!("{}\t{}", archive.name, time.unwrap_or("-"));
            }
            Ok(())
        }
        Command::Info {
            repository,
            archive,
        } => {
            let repo = find_repository(&cfg, &repository)?;
            match archive {
                Some(name) => print_json(&client.archive_info(repo, &name).await?),
                None => print_json(&client.repository_info(repo).await?),
            }
        }
        Command::Contents {
            repository,
            archive,
            path,
        } => {
            let repo = find_repository(&cfg, &repository)?;
            let entries = client
                .list_archive_contents(repo, &archive, path.as_deref())
                .await;
            for entry in &entries {
                println!("{}\t{}\t{}", entry.kind, entry.size.unwrap_or(0), entry.path);
            }
            Ok(())
        }
        Command::Delete {
            repository,
            archive,
        } => {
            let repo = find_repository(&cfg, &repository)?;
            let out = client.delete_archive(repo, &archive).await;
            report_command("borg delete", &out)
        }
        Command::Check { repository } => {
            let repo = find_repository(&cfg, &repository)?;
            print_json(&client.check_connection(repo).await)
        }
    }
}

/// Definitions and archives live in memory; runs go to the ledger chosen in
/// `[settings]`.
fn build_stores(cfg: &ConfigFile, config_path: &Path) -> Result<Stores> {
    let store = MemoryStore::from_config(cfg);
    match cfg.settings.ledger {
        LedgerStorage::Memory => Ok(Stores::in_memory(store)),
        LedgerStorage::File => {
            let path = config_root_dir(config_path).join(&cfg.settings.ledger_path);
            let ledger = FileLedger::open(&path)
                .with_context(|| format!("opening run ledger at {path:?}"))?;
            Ok(Stores::with_ledger(store, Arc::new(ledger)))
        }
    }
}

async fn run_daemon(executor: Arc<JobExecutor>) -> Result<()> {
    let scheduler = Scheduler::new(executor);
    let scheduled = scheduler.start()?;
    if scheduled == 0 {
        warn!("no jobs scheduled; idling until Ctrl+C");
    }

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl+C")?;
    info!("shutdown requested; waiting for running jobs");
    scheduler.stop().await;
    Ok(())
}

fn find_job<'a>(cfg: &'a ConfigFile, name: &str) -> Result<&'a BackupJob> {
    cfg.job(name)
        .with_context(|| format!("no job named '{name}' in config"))
}

fn find_repository<'a>(cfg: &'a ConfigFile, name: &str) -> Result<&'a Repository> {
    cfg.repository(name)
        .with_context(|| format!("no repository named '{name}' in config"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_command(what: &str, out: &CommandOutput) -> Result<()> {
    if !out.stdout.trim().is_empty() {
        println!("{}", out.stdout.trim_end());
    }
    if !out.success {
        bail!("{what} failed (exit code {}): {}", out.exit_code, out.stderr.trim());
    }
    if !out.stderr.trim().is_empty() {
        eprintln!("{}", out.stderr.trim_end());
    }
    Ok(())
}

fn print_history(runs: &[RunRecord]) {
    if runs.is_empty() {
        println!("no runs recorded");
        return;
    }
    for run in runs {
        let duration = run
            .duration_seconds
            .map_or_else(|| "-".to_string(), |d| format!("{d}s"));
        println!(
            "#{}\t{}\t{}\t{}\t{}",
            run.id,
            run.started_at.to_rfc3339(),
            run.status,
            duration,
            run.error_message.as_deref().unwrap_or("")
        );
    }
}

/// Dry-run output: settings, repositories (no secrets), jobs and their next
/// fire time.
fn print_dry_run(cfg: &ConfigFile) {
    let settings = &cfg.settings;
    println!("borgsched dry-run");
    println!("  settings.borg_binary = {}", settings.borg_binary);
    println!("  settings.backup_timeout = {:?}", settings.backup_timeout);
    println!("  settings.hook_timeout = {:?}", settings.hook_timeout);
    println!("  settings.maintenance_timeout = {:?}", settings.maintenance_timeout);
    println!(
        "  settings.retention_after_failed_backup = {}",
        settings.retention_after_failed_backup
    );
    println!("  settings.exclusive_runs = {}", settings.exclusive_runs);
    println!("  settings.ledger = {:?}", settings.ledger);
    println!();

    println!("repositories ({}):", cfg.repositories.len());
    for repo in &cfg.repositories {
        println!("  - {} ({:?}) {}", repo.name, repo.repo_type, repo.url);
    }
    println!();

    let now = Utc::now();
    println!("jobs ({}):", cfg.jobs.len());
    for job in &cfg.jobs {
        let repo = cfg
            .repositories
            .iter()
            .find(|r| r.id == job.repository_id)
            .map_or("?", |r| r.name.as_str());
        println!("  - {}", job.name);
        println!("      repository: {repo}");
        println!("      sources: {:?}", job.source_paths);
        if !job.exclusion_patterns.is_empty() {
            println!("      exclude: {:?}", job.exclusion_patterns);
        }
        println!("      schedule: {} ({})", job.schedule_cron, job.timezone);
        if !job.enabled {
            println!("      next run: disabled");
        } else {
            match CronSchedule::parse(&job.schedule_cron, &job.timezone) {
                Ok(schedule) => match schedule.next_after(now) {
                    Some(at) => println!("      next run: {}", at.to_rfc3339()),
                    None => println!("      next run: never"),
                },
                Err(e) => println!("      next run: invalid schedule ({e})"),
            }
        }
        let tiers = job.retention.tiers();
        if !tiers.is_empty() && job.auto_prune {
            let tiers: Vec<String> = tiers.iter().map(|(f, n)| format!("{f}={n}")).collect();
            println!("      retention: {}", tiers.join(" "));
        }
        if job.pre_backup_script.is_some() {
            println!("      pre_backup_script: yes");
        }
        if job.post_backup_script.is_some() {
            println!("      post_backup_script: yes");
        }
    }

    debug!("dry-run complete (no execution)");
}
