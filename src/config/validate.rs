// src/config/validate.rs

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ConfigFile, JobConfig, RawConfigFile, RawSettings, RepositoryConfig, Settings,
    default_ledger_path,
};
use crate::engine::render_archive_name;
use crate::errors::{BorgschedError, Result};
use crate::model::{BackupJob, Repository, RetentionPolicy};
use crate::types::{RepoType, RepositoryId, SshAuthMethod};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::BorgschedError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_jobs(&raw)?;
        let settings = validate_settings(&raw.settings)?;
        let repositories = validate_repositories(&raw.repository)?;
        let jobs = validate_jobs(&raw.job, &repositories)?;
        Ok(ConfigFile::new_unchecked(settings, repositories, jobs))
    }
}

fn config_error(msg: impl Into<String>) -> BorgschedError {
    BorgschedError::ConfigError(msg.into())
}

fn ensure_has_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(config_error(
            "config must contain at least one [job.<name>] section",
        ));
    }
    Ok(())
}

fn validate_settings(raw: &RawSettings) -> Result<Settings> {
    if raw.borg_binary.trim().is_empty() {
        return Err(config_error("[settings].borg_binary must not be empty"));
    }
    if raw.hostname.as_deref().is_some_and(|h| h.trim().is_empty()) {
        return Err(config_error("[settings].hostname must not be empty"));
    }
    if raw.checkpoint_interval == 0 {
        return Err(config_error(
            "[settings].checkpoint_interval must be >= 1 (got 0)",
        ));
    }

    Ok(Settings {
        borg_binary: raw.borg_binary.trim().to_string(),
        hostname: raw.hostname.as_ref().map(|h| h.trim().to_string()),
        checkpoint_interval: raw.checkpoint_interval,
        backup_timeout: timeout("backup_timeout", &raw.backup_timeout)?,
        hook_timeout: timeout("hook_timeout", &raw.hook_timeout)?,
        maintenance_timeout: timeout("maintenance_timeout", &raw.maintenance_timeout)?,
        retention_after_failed_backup: raw.retention_after_failed_backup,
        exclusive_runs: raw.exclusive_runs,
        ledger: raw.ledger,
        ledger_path: raw
            .ledger_path
            .as_ref()
            .map(Into::into)
            .unwrap_or_else(default_ledger_path),
    })
}

fn timeout(key: &str, raw: &str) -> Result<Duration> {
    let value =
        parse_duration(raw).map_err(|e| config_error(format!("[settings].{key}: {e}")))?;
    if value.is_zero() {
        return Err(config_error(format!("[settings].{key} must be greater than zero")));
    }
    Ok(value)
}

fn validate_repositories(raw: &BTreeMap<String, RepositoryConfig>) -> Result<Vec<Repository>> {
    let mut repositories = Vec::with_capacity(raw.len());

    for ((name, repo), id) in raw.iter().zip(1..) {
        validate_name("repository", name)?;
        if repo.url.trim().is_empty() {
            return Err(config_error(format!(
                "repository '{name}' has an empty url"
            )));
        }
        if repo.repo_type == RepoType::Ssh
            && repo.ssh_auth_method == SshAuthMethod::Password
            && repo.ssh_password.as_deref().is_none_or(str::is_empty)
        {
            return Err(config_error(format!(
                "repository '{name}' uses ssh password auth but has no ssh_password"
            )));
        }

        repositories.push(Repository {
            id,
            name: name.clone(),
            repo_type: repo.repo_type,
            url: repo.url.trim().to_string(),
            ssh_key_path: repo.ssh_key_path.clone(),
            ssh_password: repo.ssh_password.clone(),
            ssh_auth_method: repo.ssh_auth_method,
            remote_path: repo.remote_path.clone(),
            passphrase: repo.passphrase.clone(),
            encryption_mode: repo.encryption_mode,
        });
    }

    Ok(repositories)
}

fn validate_jobs(
    raw: &BTreeMap<String, JobConfig>,
    repositories: &[Repository],
) -> Result<Vec<BackupJob>> {
    let mut jobs = Vec::with_capacity(raw.len());

    for ((name, job), id) in raw.iter().zip(1..) {
        validate_name("job", name)?;
        let repository_id = resolve_repository(name, &job.repository, repositories)?;

        if job.source_paths.iter().all(|p| p.trim().is_empty()) {
            return Err(config_error(format!(
                "job '{name}' must list at least one entry in `source_paths`"
            )));
        }
        if job.schedule_cron.trim().is_empty() {
            return Err(config_error(format!("job '{name}' has an empty `schedule_cron`")));
        }
        if job.compression.trim().is_empty() {
            return Err(config_error(format!("job '{name}' has an empty `compression`")));
        }
        render_archive_name(&job.archive_name_pattern, "host", Utc::now()).map_err(|e| {
            config_error(format!("job '{name}' has an invalid `archive_name_pattern`: {e}"))
        })?;

        jobs.push(BackupJob {
            id,
            name: name.clone(),
            repository_id,
            enabled: job.enabled,
            source_paths: non_empty(&job.source_paths),
            exclusion_patterns: non_empty(&job.exclusion_patterns),
            schedule_cron: job.schedule_cron.trim().to_string(),
            timezone: job.timezone.trim().to_string(),
            compression: job.compression.trim().to_string(),
            archive_name_pattern: job.archive_name_pattern.clone(),
            pre_backup_script: non_blank(&job.pre_backup_script),
            post_backup_script: non_blank(&job.post_backup_script),
            retention: RetentionPolicy {
                keep_last: job.keep_last,
                keep_hourly: job.keep_hourly,
                keep_daily: job.keep_daily,
                keep_weekly: job.keep_weekly,
                keep_monthly: job.keep_monthly,
                keep_yearly: job.keep_yearly,
            },
            auto_prune: job.auto_prune,
            last_run_at: None,
            last_status: None,
            next_run_at: None,
        });
    }

    Ok(jobs)
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() || name.trim() != name {
        return Err(config_error(format!(
            "{kind} name '{name}' must be non-empty and have no surrounding whitespace"
        )));
    }
    Ok(())
}

fn resolve_repository(
    job: &str,
    reference: &str,
    repositories: &[Repository],
) -> Result<RepositoryId> {
    repositories
        .iter()
        .find(|r| r.name == reference)
        .map(|r| r.id)
        .ok_or_else(|| {
            config_error(format!(
                "job '{job}' references unknown repository '{reference}'"
            ))
        })
}

fn non_empty(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_blank(script: &Option<String>) -> Option<String> {
    script
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}
