#![allow(dead_code)]

use borgsched::model::{BackupJob, Repository, RetentionPolicy};
use borgsched::store::{MemoryStore, Stores};
use borgsched::types::{EncryptionMode, JobId, RepoType, RepositoryId, SshAuthMethod};

/// Builder for `Repository` to simplify test setup.
pub struct RepositoryBuilder {
    repo: Repository,
}

impl RepositoryBuilder {
    /// A local repository at `/srv/borg/<name>`.
    pub fn new(id: RepositoryId, name: &str) -> Self {
        Self {
            repo: Repository {
                id,
                name: name.to_string(),
                repo_type: RepoType::Local,
                url: format!("/srv/borg/{name}"),
                ssh_key_path: None,
                ssh_password: None,
                ssh_auth_method: SshAuthMethod::Key,
                remote_path: None,
                passphrase: None,
                encryption_mode: None,
            },
        }
    }

    pub fn url(mut self, url: &str) -> Self {
        self.repo.url = url.to_string();
        self
    }

    pub fn ssh(mut self, url: &str) -> Self {
        self.repo.repo_type = RepoType::Ssh;
        self.repo.url = url.to_string();
        self
    }

    pub fn ssh_key(mut self, path: &str) -> Self {
        self.repo.ssh_auth_method = SshAuthMethod::Key;
        self.repo.ssh_key_path = Some(path.to_string());
        self
    }

    pub fn ssh_password(mut self, password: &str) -> Self {
        self.repo.ssh_auth_method = SshAuthMethod::Password;
        self.repo.ssh_password = Some(password.to_string());
        self
    }

    pub fn passphrase(mut self, passphrase: &str) -> Self {
        self.repo.passphrase = Some(passphrase.to_string());
        self
    }

    pub fn encryption(mut self, mode: EncryptionMode) -> Self {
        self.repo.encryption_mode = Some(mode);
        self
    }

    pub fn build(self) -> Repository {
        self.repo
    }
}

/// Builder for `BackupJob`.
///
/// Defaults: enabled, sources `["/data"]`, cron `0 2 * * *` in UTC, lz4,
/// pattern `{hostname}-{now}`, no hooks, no retention, `auto_prune = true`.
pub struct JobBuilder {
    job: BackupJob,
}

impl JobBuilder {
    pub fn new(id: JobId, name: &str, repository_id: RepositoryId) -> Self {
        Self {
            job: BackupJob {
                id,
                name: name.to_string(),
                repository_id,
                enabled: true,
                source_paths: vec!["/data".to_string()],
                exclusion_patterns: vec![],
                schedule_cron: "0 2 * * *".to_string(),
                timezone: "UTC".to_string(),
                compression: "lz4".to_string(),
                archive_name_pattern: "{hostname}-{now}".to_string(),
                pre_backup_script: None,
                post_backup_script: None,
                retention: RetentionPolicy::default(),
                auto_prune: true,
                last_run_at: None,
                last_status: None,
                next_run_at: None,
            },
        }
    }

    pub fn sources(mut self, paths: &[&str]) -> Self {
        self.job.source_paths = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.job.exclusion_patterns.push(pattern.to_string());
        self
    }

    pub fn cron(mut self, expr: &str) -> Self {
        self.job.schedule_cron = expr.to_string();
        self
    }

    pub fn timezone(mut self, tz: &str) -> Self {
        self.job.timezone = tz.to_string();
        self
    }

    pub fn archive_pattern(mut self, pattern: &str) -> Self {
        self.job.archive_name_pattern = pattern.to_string();
        self
    }

    pub fn pre_hook(mut self, script: &str) -> Self {
        self.job.pre_backup_script = Some(script.to_string());
        self
    }

    pub fn post_hook(mut self, script: &str) -> Self {
        self.job.post_backup_script = Some(script.to_string());
        self
    }

    pub fn keep_daily(mut self, n: u32) -> Self {
        self.job.retention.keep_daily = Some(n);
        self
    }

    pub fn keep_weekly(mut self, n: u32) -> Self {
        self.job.retention.keep_weekly = Some(n);
        self
    }

    pub fn auto_prune(mut self, val: bool) -> Self {
        self.job.auto_prune = val;
        self
    }

    pub fn enabled(mut self, val: bool) -> Self {
        self.job.enabled = val;
        self
    }

    pub fn build(self) -> BackupJob {
        self.job
    }
}

/// In-memory stores seeded with `repositories` and `jobs`.
pub fn memory_stores(repositories: Vec<Repository>, jobs: Vec<BackupJob>) -> Stores {
    Stores::in_memory(MemoryStore::new(repositories, jobs))
}
