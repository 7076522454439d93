// src/engine/mod.rs

//! Backup run execution.
//!
//! [`JobExecutor`] turns a job id into a terminal [`RunRecord`]: it drives
//! the hooks, `borg create`, archive bookkeeping and retention through a
//! [`ProcessRunner`], and records everything in the stores.
//!
//! - [`archive_name`] expands archive name templates.
//! - [`run_log`] accumulates the per-run log text.
//!
//! [`RunRecord`]: crate::model::RunRecord
//! [`ProcessRunner`]: crate::exec::ProcessRunner

pub mod archive_name;
pub mod executor;
pub mod run_log;

pub use archive_name::{DEFAULT_ARCHIVE_NAME_PATTERN, render_archive_name};
pub use executor::{
    ALREADY_RUNNING, DEFAULT_BACKUP_TIMEOUT, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_HOOK_TIMEOUT,
    DEFAULT_MAINTENANCE_TIMEOUT, EngineOptions, JobExecutor, PRUNE_SKIPPED_NOTE, system_hostname,
};
pub use run_log::RunLog;
