// src/store/memory.rs

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::ConfigFile;
use crate::errors::{BorgschedError, Result};
use crate::model::{ArchiveRecord, BackupJob, Repository, RunRecord};
use crate::types::{ArchiveId, JobId, RepositoryId, RunId, RunStatus};

use super::{ArchiveStore, JobStore, RepositoryStore, RunLedger, sort_newest_first};

#[derive(Default)]
struct Inner {
    jobs: BTreeMap<JobId, BackupJob>,
    repositories: BTreeMap<RepositoryId, Repository>,
    runs: BTreeMap<RunId, RunRecord>,
    archives: BTreeMap<ArchiveId, ArchiveRecord>,
    next_run_id: RunId,
    next_archive_id: ArchiveId,
}

/// In-memory implementation of every store trait.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl MemoryStore {
    pub fn new(repositories: Vec<Repository>, jobs: Vec<BackupJob>) -> Self {
        let inner = Inner {
            jobs: jobs.into_iter().map(|j| (j.id, j)).collect(),
            repositories: repositories.into_iter().map(|r| (r.id, r)).collect(),
            next_run_id: 1,
            next_archive_id: 1,
            ..Default::default()
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Seed repositories and jobs from a validated config file.
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self::new(cfg.repositories.clone(), cfg.jobs.clone())
    }

    /// Insert or replace a job definition.
    pub fn upsert_job(&self, job: BackupJob) {
        self.lock().jobs.insert(job.id, job);
    }

    /// Poisoning is ignored: every write leaves `Inner` consistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_job<F>(&self, id: JobId, f: F) -> Result<()>
    where
        F: FnOnce(&mut BackupJob),
    {
        let mut inner = self.lock();
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(BorgschedError::JobNotFound(id))?;
        f(job);
        Ok(())
    }
}

impl JobStore for MemoryStore {
    fn get_job(&self, id: JobId) -> Result<Option<BackupJob>> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    fn job_by_name(&self, name: &str) -> Result<Option<BackupJob>> {
        Ok(self.lock().jobs.values().find(|j| j.name == name).cloned())
    }

    fn all_jobs(&self) -> Result<Vec<BackupJob>> {
        Ok(self.lock().jobs.values().cloned().collect())
    }

    fn set_next_run_at(&self, id: JobId, next: Option<DateTime<Utc>>) -> Result<()> {
        self.with_job(id, |job| job.next_run_at = next)
    }

    fn mark_run_started(&self, id: JobId, at: DateTime<Utc>) -> Result<()> {
        self.with_job(id, |job| {
            job.last_run_at = Some(at);
            job.last_status = Some(RunStatus::Running);
        })
    }

    fn set_last_status(&self, id: JobId, status: RunStatus) -> Result<()> {
        self.with_job(id, |job| job.last_status = Some(status))
    }
}

impl RepositoryStore for MemoryStore {
    fn get_repository(&self, id: RepositoryId) -> Result<Option<Repository>> {
        Ok(self.lock().repositories.get(&id).cloned())
    }

    fn repository_by_name(&self, name: &str) -> Result<Option<Repository>> {
        Ok(self
            .lock()
            .repositories
            .values()
            .find(|r| r.name == name)
            .cloned())
    }

    fn all_repositories(&self) -> Result<Vec<Repository>> {
        Ok(self.lock().repositories.values().cloned().collect())
    }
}

impl RunLedger for MemoryStore {
    fn create_run(&self, mut run: RunRecord) -> Result<RunRecord> {
        let mut inner = self.lock();
        run.id = inner.next_run_id;
        inner.next_run_id += 1;
        inner.runs.insert(run.id, run.clone());
        debug!(run_id = run.id, job_id = run.job_id, "created run record (memory)");
        Ok(run)
    }

    fn update_run(&self, run: &RunRecord) -> Result<()> {
        let mut inner = self.lock();
        match inner.runs.get_mut(&run.id) {
            Some(slot) => {
                *slot = run.clone();
                Ok(())
            }
            None => Err(BorgschedError::RunNotFound(run.id)),
        }
    }

    fn get_run(&self, id: RunId) -> Result<Option<RunRecord>> {
        Ok(self.lock().runs.get(&id).cloned())
    }

    fn runs_for_job(&self, job_id: JobId, limit: usize) -> Result<Vec<RunRecord>> {
        let mut runs: Vec<RunRecord> = self
            .lock()
            .runs
            .values()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        sort_newest_first(&mut runs);
        runs.truncate(limit);
        Ok(runs)
    }
}

impl ArchiveStore for MemoryStore {
    fn create_archive(&self, mut archive: ArchiveRecord) -> Result<ArchiveRecord> {
        let mut inner = self.lock();
        archive.id = inner.next_archive_id;
        inner.next_archive_id += 1;
        inner.archives.insert(archive.id, archive.clone());
        Ok(archive)
    }

    fn update_archive(&self, archive: &ArchiveRecord) -> Result<()> {
        match self.lock().archives.get_mut(&archive.id) {
            Some(slot) => {
                *slot = archive.clone();
                Ok(())
            }
            None => Err(BorgschedError::ArchiveNotFound(archive.id)),
        }
    }

    fn get_archive(&self, id: ArchiveId) -> Result<Option<ArchiveRecord>> {
        Ok(self.lock().archives.get(&id).cloned())
    }

    fn archives_for_repository(&self, repository_id: RepositoryId) -> Result<Vec<ArchiveRecord>> {
        Ok(self
            .lock()
            .archives
            .values()
            .filter(|a| a.repository_id == repository_id)
            .cloned()
            .collect())
    }
}
