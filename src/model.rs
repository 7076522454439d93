// src/model.rs

//! Entities shared by the stores, the execution engine and the scheduler.
//!
//! Repositories and job definitions are owned by whatever layer creates them
//! (here: the config file). The engine only reads them, except for the
//! run-tracking fields on [`BackupJob`], which are written through the
//! dedicated store operations.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    ArchiveId, ConnectionState, EncryptionMode, JobId, RepoType, RepositoryId, RunId, RunStatus,
    SshAuthMethod,
};

/// Connection descriptor for a borg repository.
#[derive(Clone, PartialEq, Eq)]
pub struct Repository {
    pub id: RepositoryId,
    pub name: String,
    pub repo_type: RepoType,
    /// Local path or SSH URL (`ssh://user@host:port/path` or `user@host:/path`).
    pub url: String,
    pub ssh_key_path: Option<String>,
    pub ssh_password: Option<String>,
    pub ssh_auth_method: SshAuthMethod,
    /// Path of the borg binary on the remote host (`--remote-path`).
    pub remote_path: Option<String>,
    pub passphrase: Option<String>,
    pub encryption_mode: Option<EncryptionMode>,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("repo_type", &self.repo_type)
            .field("url", &self.url)
            .field("ssh_key_path", &self.ssh_key_path)
            .field("ssh_password", &self.ssh_password.as_ref().map(|_| "<redacted>"))
            .field("ssh_auth_method", &self.ssh_auth_method)
            .field("remote_path", &self.remote_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("encryption_mode", &self.encryption_mode)
            .finish()
    }
}

/// Tiered keep-counts passed to `borg prune`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub keep_last: Option<u32>,
    pub keep_hourly: Option<u32>,
    pub keep_daily: Option<u32>,
    pub keep_weekly: Option<u32>,
    pub keep_monthly: Option<u32>,
    pub keep_yearly: Option<u32>,
}

impl RetentionPolicy {
    /// The configured tiers as `(borg flag, count)` pairs, in borg's order.
    ///
    /// A tier set to `0` counts as unset.
    pub fn tiers(&self) -> Vec<(&'static str, u32)> {
        [
            ("--keep-last", self.keep_last),
            ("--keep-hourly", self.keep_hourly),
            ("--keep-daily", self.keep_daily),
            ("--keep-weekly", self.keep_weekly),
            ("--keep-monthly", self.keep_monthly),
            ("--keep-yearly", self.keep_yearly),
        ]
        .into_iter()
        .filter_map(|(flag, value)| match value {
            Some(n) if n > 0 => Some((flag, n)),
            _ => None,
        })
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers().is_empty()
    }
}

/// A scheduled backup job definition plus its run-tracking summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupJob {
    pub id: JobId,
    pub name: String,
    pub repository_id: RepositoryId,
    pub enabled: bool,
    pub source_paths: Vec<String>,
    pub exclusion_patterns: Vec<String>,
    pub schedule_cron: String,
    /// IANA timezone name used to evaluate `schedule_cron`.
    pub timezone: String,
    pub compression: String,
    /// Supports `{hostname}`, `{now}`, `{utcnow}` and `{now:<strftime>}`.
    pub archive_name_pattern: String,
    pub pre_backup_script: Option<String>,
    pub post_backup_script: Option<String>,
    pub retention: RetentionPolicy,
    pub auto_prune: bool,

    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl BackupJob {
    /// Entries of `source_paths` that are not blank.
    pub fn backup_sources(&self) -> Vec<String> {
        self.source_paths
            .iter()
            .filter(|p| !p.trim().is_empty())
            .cloned()
            .collect()
    }
}

/// One execution attempt of a backup job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub job_id: JobId,
    pub archive_id: Option<ArchiveId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub log_output: String,
    pub error_message: Option<String>,
    pub bytes_processed: Option<u64>,
    pub bytes_deduplicated: Option<u64>,
    pub duration_seconds: Option<i64>,
}

impl RunRecord {
    /// A fresh record in `running` state. The store assigns the real id.
    pub fn started(job_id: JobId, started_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            job_id,
            archive_id: None,
            started_at,
            finished_at: None,
            status: RunStatus::Running,
            log_output: String::new(),
            error_message: None,
            bytes_processed: None,
            bytes_deduplicated: None,
            duration_seconds: None,
        }
    }

    /// A terminal `failed` record that never reached the ledger, used when a
    /// run could not even start (unknown job, run already in progress).
    pub fn rejected(job_id: JobId, message: impl Into<String>) -> Self {
        let now = Utc::now();
        let message = message.into();
        Self {
            finished_at: Some(now),
            status: RunStatus::Failed,
            log_output: message.clone(),
            error_message: Some(message),
            duration_seconds: Some(0),
            ..Self::started(job_id, now)
        }
    }

    /// Move the run to its terminal state. Only the first call has any effect.
    pub fn finish(&mut self, status: RunStatus, finished_at: DateTime<Utc>) {
        if self.finished_at.is_some() {
            return;
        }
        self.status = status;
        self.finished_at = Some(finished_at);
        self.duration_seconds = Some((finished_at - self.started_at).num_seconds());
    }
}

/// A borg archive created by a successful backup run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: ArchiveId,
    pub repository_id: RepositoryId,
    pub name: String,
    pub borg_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub original_size: u64,
    pub compressed_size: u64,
    pub deduplicated_size: u64,
    pub nfiles: u64,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub comment: Option<String>,
    /// Raw JSON document returned by `borg create`.
    pub stats: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of checking a repository with `borg info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryStatus {
    pub repository_id: RepositoryId,
    pub name: String,
    pub status: ConnectionState,
    pub message: Option<String>,
    pub last_checked: DateTime<Utc>,
}
