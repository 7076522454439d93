// src/store/mod.rs

//! Persistence contracts used by the engine and the scheduler.
//!
//! - [`JobStore`] and [`RepositoryStore`] expose the stored definitions plus
//!   the narrow writes the engine/scheduler are allowed to make on a job
//!   (run-tracking fields only).
//! - [`RunLedger`] records run attempts.
//! - [`ArchiveStore`] records archives created by successful runs.
//!
//! [`memory::MemoryStore`] implements all four in memory;
//! [`ledger::FileLedger`] is a JSON-lines backed [`RunLedger`] for
//! history that survives restarts.

pub mod ledger;
pub mod memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::model::{ArchiveRecord, BackupJob, Repository, RunRecord};
use crate::types::{ArchiveId, JobId, RepositoryId, RunId, RunStatus};

pub use ledger::FileLedger;
pub use memory::MemoryStore;

/// Default number of runs returned by history queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

pub trait JobStore: Send + Sync {
    fn get_job(&self, id: JobId) -> Result<Option<BackupJob>>;
    fn job_by_name(&self, name: &str) -> Result<Option<BackupJob>>;
    fn all_jobs(&self) -> Result<Vec<BackupJob>>;

    fn enabled_jobs(&self) -> Result<Vec<BackupJob>> {
        Ok(self.all_jobs()?.into_iter().filter(|j| j.enabled).collect())
    }

    /// Written by the scheduler whenever a trigger is (re)computed or removed.
    fn set_next_run_at(&self, id: JobId, next: Option<DateTime<Utc>>) -> Result<()>;

    /// Sets `last_run_at = at` and `last_status = running`.
    fn mark_run_started(&self, id: JobId, at: DateTime<Utc>) -> Result<()>;

    fn set_last_status(&self, id: JobId, status: RunStatus) -> Result<()>;
}

pub trait RepositoryStore: Send + Sync {
    fn get_repository(&self, id: RepositoryId) -> Result<Option<Repository>>;
    fn repository_by_name(&self, name: &str) -> Result<Option<Repository>>;
    fn all_repositories(&self) -> Result<Vec<Repository>>;
}

pub trait RunLedger: Send + Sync {
    /// Persist a new run and return it with its assigned id.
    fn create_run(&self, run: RunRecord) -> Result<RunRecord>;

    /// Overwrite a previously created run.
    fn update_run(&self, run: &RunRecord) -> Result<()>;

    fn get_run(&self, id: RunId) -> Result<Option<RunRecord>>;

    /// Most recent runs of a job, newest `started_at` first.
    fn runs_for_job(&self, job_id: JobId, limit: usize) -> Result<Vec<RunRecord>>;
}

pub trait ArchiveStore: Send + Sync {
    /// Persist a new archive and return it with its assigned id.
    fn create_archive(&self, archive: ArchiveRecord) -> Result<ArchiveRecord>;

    /// Overwrite a previously created archive.
    fn update_archive(&self, archive: &ArchiveRecord) -> Result<()>;

    fn get_archive(&self, id: ArchiveId) -> Result<Option<ArchiveRecord>>;
    fn archives_for_repository(&self, repository_id: RepositoryId) -> Result<Vec<ArchiveRecord>>;
}

/// The set of stores a scheduler/engine works against.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub repositories: Arc<dyn RepositoryStore>,
    pub runs: Arc<dyn RunLedger>,
    pub archives: Arc<dyn ArchiveStore>,
}

impl Stores {
    /// Everything backed by one [`MemoryStore`].
    pub fn in_memory(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            jobs: store.clone(),
            repositories: store.clone(),
            runs: store.clone(),
            archives: store,
        }
    }

    /// Definitions and archives in memory, run history in `ledger`.
    pub fn with_ledger(store: MemoryStore, ledger: Arc<dyn RunLedger>) -> Self {
        let store = Arc::new(store);
        Self {
            jobs: store.clone(),
            repositories: store.clone(),
            runs: ledger,
            archives: store,
        }
    }
}

/// Newest first; ties broken by the higher (later) run id.
pub(crate) fn sort_newest_first(runs: &mut [RunRecord]) {
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
}
