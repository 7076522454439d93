// src/config/model.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::{DEFAULT_ARCHIVE_NAME_PATTERN, DEFAULT_CHECKPOINT_INTERVAL, EngineOptions};
use crate::model::{BackupJob, Repository};
use crate::store::ledger::DEFAULT_LEDGER_PATH;
use crate::types::{EncryptionMode, LedgerStorage, RepoType, SshAuthMethod};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [settings]
/// borg_binary = "borg"
/// backup_timeout = "1h"
///
/// [repository.nas]
/// repo_type = "ssh"
/// url = "backup@nas:/srv/borg"
///
/// [job.home]
/// repository = "nas"
/// source_paths = ["/home"]
/// schedule_cron = "0 2 * * *"
/// keep_daily = 7
/// ```
///
/// Repositories and jobs are keyed by name.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub settings: RawSettings,

    #[serde(default)]
    pub repository: BTreeMap<String, RepositoryConfig>,

    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// `[settings]` section. Durations are strings like `"90s"` or `"1h"`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSettings {
    #[serde(default = "default_borg_binary")]
    pub borg_binary: String,

    /// Overrides the system hostname for `{hostname}` and archive records.
    #[serde(default)]
    pub hostname: Option<String>,

    /// Seconds between `borg create` checkpoints.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    #[serde(default = "default_backup_timeout")]
    pub backup_timeout: String,

    #[serde(default = "default_hook_timeout")]
    pub hook_timeout: String,

    #[serde(default = "default_maintenance_timeout")]
    pub maintenance_timeout: String,

    #[serde(default = "default_true")]
    pub retention_after_failed_backup: bool,

    #[serde(default)]
    pub exclusive_runs: bool,

    #[serde(default)]
    pub ledger: LedgerStorage,

    /// Only used with `ledger = "file"`. Relative paths are resolved against
    /// the config file's directory.
    #[serde(default)]
    pub ledger_path: Option<String>,
}

fn default_borg_binary() -> String {
    "borg".to_string()
}

fn default_checkpoint_interval() -> u64 {
    DEFAULT_CHECKPOINT_INTERVAL
}

fn default_backup_timeout() -> String {
    "1h".to_string()
}

fn default_hook_timeout() -> String {
    "5m".to_string()
}

fn default_maintenance_timeout() -> String {
    "10m".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RawSettings {
    fn default() -> Self {
        Self {
            borg_binary: default_borg_binary(),
            hostname: None,
            checkpoint_interval: default_checkpoint_interval(),
            backup_timeout: default_backup_timeout(),
            hook_timeout: default_hook_timeout(),
            maintenance_timeout: default_maintenance_timeout(),
            retention_after_failed_backup: true,
            exclusive_runs: false,
            ledger: LedgerStorage::default(),
            ledger_path: None,
        }
    }
}

/// `[repository.<name>]` section.
#[derive(Clone, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub repo_type: RepoType,

    pub url: String,

    #[serde(default)]
    pub ssh_key_path: Option<String>,

    #[serde(default)]
    pub ssh_password: Option<String>,

    #[serde(default)]
    pub ssh_auth_method: SshAuthMethod,

    /// `--remote-path` for the borg binary on the remote host.
    #[serde(default)]
    pub remote_path: Option<String>,

    #[serde(default)]
    pub passphrase: Option<String>,

    #[serde(default)]
    pub encryption_mode: Option<EncryptionMode>,
}

impl fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryConfig")
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

/// `[job.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Name of a `[repository.<name>]` section.
    pub repository: String,

    #[serde(default)]
    pub source_paths: Vec<String>,

    #[serde(default)]
    pub exclusion_patterns: Vec<String>,

    /// Five-field crontab expression. Checked when the job is scheduled,
    /// not at load time.
    pub schedule_cron: String,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_compression")]
    pub compression: String,

    #[serde(default = "default_archive_name_pattern")]
    pub archive_name_pattern: String,

    #[serde(default)]
    pub pre_backup_script: Option<String>,

    #[serde(default)]
    pub post_backup_script: Option<String>,

    #[serde(default)]
    pub keep_last: Option<u32>,
    #[serde(default)]
    pub keep_hourly: Option<u32>,
    #[serde(default)]
    pub keep_daily: Option<u32>,
    #[serde(default)]
    pub keep_weekly: Option<u32>,
    #[serde(default)]
    pub keep_monthly: Option<u32>,
    #[serde(default)]
    pub keep_yearly: Option<u32>,

    #[serde(default = "default_true")]
    pub auto_prune: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_compression() -> String {
    "lz4".to_string()
}

fn default_archive_name_pattern() -> String {
    DEFAULT_ARCHIVE_NAME_PATTERN.to_string()
}

/// Validated `[settings]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub borg_binary: String,
    pub hostname: Option<String>,
    pub checkpoint_interval: u64,
    pub backup_timeout: Duration,
    pub hook_timeout: Duration,
    pub maintenance_timeout: Duration,
    pub retention_after_failed_backup: bool,
    pub exclusive_runs: bool,
    pub ledger: LedgerStorage,
    pub ledger_path: PathBuf,
}

impl Settings {
    /// Engine tunables. Without a `hostname` override the system hostname is
    /// used.
    pub fn engine_options(&self) -> EngineOptions {
        let defaults = EngineOptions::default();
        EngineOptions {
            backup_timeout: self.backup_timeout,
            hook_timeout: self.hook_timeout,
            maintenance_timeout: self.maintenance_timeout,
            checkpoint_interval: self.checkpoint_interval,
            hostname: self.hostname.clone().unwrap_or(defaults.hostname),
            retention_after_failed_backup: self.retention_after_failed_backup,
            exclusive_runs: self.exclusive_runs,
        }
    }
}

/// Validated configuration.
///
/// Repositories and jobs carry ids assigned in name order, starting at 1.
/// Construct it via `TryFrom<RawConfigFile>` (see `validate.rs`) or
/// [`crate::config::load_and_validate`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub settings: Settings,
    pub repositories: Vec<Repository>,
    pub jobs: Vec<BackupJob>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        settings: Settings,
        repositories: Vec<Repository>,
        jobs: Vec<BackupJob>,
    ) -> Self {
        Self {
            settings,
            repositories,
            jobs,
        }
    }

    pub fn job(&self, name: &str) -> Option<&BackupJob> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn repository(&self, name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.name == name)
    }
}

pub(crate) fn default_ledger_path() -> PathBuf {
    PathBuf::from(DEFAULT_LEDGER_PATH)
}
