// src/schedule/scheduler.rs

//! Async shell around the [`TriggerTable`].
//!
//! The scheduler owns:
//! - the trigger table (behind a `std::sync::Mutex`, never held across an
//!   `.await`)
//! - a trigger loop that sleeps until the earliest fire instant, or until a
//!   table change wakes it, and pushes due job ids onto the dispatch queue
//! - the dispatcher (see [`super::dispatch`]) that runs each job in its own
//!   task

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::JobExecutor;
use crate::errors::{BorgschedError, Result};
use crate::model::{BackupJob, RunRecord};
use crate::types::JobId;

use super::clock::{Clock, SystemClock};
use super::cron::CronSchedule;
use super::dispatch::spawn_dispatcher;
use super::trigger_table::TriggerTable;

/// Upper bound on one trigger-loop sleep, so wall-clock jumps (suspend,
/// NTP corrections) are noticed.
const MAX_SLEEP: Duration = Duration::from_secs(60);

struct Shared {
    executor: Arc<JobExecutor>,
    clock: Arc<dyn Clock>,
    table: Mutex<TriggerTable>,
    wake: Notify,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, TriggerTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist_next_run(&self, job_id: JobId, next: Option<DateTime<Utc>>) {
        match self.executor.stores().jobs.set_next_run_at(job_id, next) {
            Ok(()) | Err(BorgschedError::JobNotFound(_)) => {}
            Err(e) => warn!(job_id, error = %e, "failed to persist next_run_at"),
        }
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    trigger_loop: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Cron-driven scheduler for backup jobs.
pub struct Scheduler {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(executor: Arc<JobExecutor>) -> Self {
        Self::with_clock(executor, Arc::new(SystemClock))
    }

    /// Like [`Scheduler::new`], reading the current instant from `clock`.
    pub fn with_clock(executor: Arc<JobExecutor>, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                executor,
                clock,
                table: Mutex::new(TriggerTable::new()),
                wake: Notify::new(),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn executor(&self) -> &Arc<JobExecutor> {
        &self.shared.executor
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Schedule every enabled stored job and start the trigger loop.
    ///
    /// Jobs that `schedule` rejects are logged and skipped. Returns the
    /// number of jobs scheduled. Calling `start` on a running scheduler is a
    /// no-op.
    pub fn start(&self) -> Result<usize> {
        let mut running = self.running();
        if running.is_some() {
            debug!("scheduler already started");
            return Ok(self.shared.table().len());
        }

        let jobs = self.shared.executor.stores().jobs.enabled_jobs()?;
        let mut scheduled = 0;
        for job in &jobs {
            if self.schedule(job).is_ok() {
                scheduled += 1;
                info!(job = %job.name, "loaded job");
            }
        }

        let (dispatch_tx, dispatcher) = spawn_dispatcher(self.shared.executor.clone());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let trigger_loop = tokio::spawn(trigger_loop(self.shared.clone(), dispatch_tx, shutdown_rx));

        *running = Some(Running {
            shutdown,
            trigger_loop,
            dispatcher,
        });
        info!(jobs = scheduled, "scheduler started");
        Ok(scheduled)
    }

    /// Stop the trigger loop and wait for in-flight runs to finish.
    ///
    /// Triggers stay registered, so a later `start` resumes them.
    pub async fn stop(&self) {
        let Some(running) = self.running().take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.trigger_loop.await {
            warn!(error = %e, "trigger loop ended abnormally");
        }
        if let Err(e) = running.dispatcher.await {
            warn!(error = %e, "dispatcher ended abnormally");
        }
        info!("scheduler stopped");
    }

    /// Register or replace the trigger for `job` and persist its
    /// `next_run_at`.
    ///
    /// A job without source paths, or with an invalid cron expression or
    /// timezone, is logged, any stale trigger for the job is removed, and the
    /// error is returned. A disabled job is
    /// unscheduled. Returns the next fire instant.
    pub fn schedule(&self, job: &BackupJob) -> Result<Option<DateTime<Utc>>> {
        if !job.enabled {
            debug!(job = %job.name, "job disabled; not scheduling");
            self.unschedule(job.id);
            return Ok(None);
        }

        if job.backup_sources().is_empty() {
            error!(job = %job.name, "job has no source paths; job not scheduled");
            self.unschedule(job.id);
            return Err(BorgschedError::ConfigError(format!(
                "job '{}' has no source paths",
                job.name
            )));
        }

        let schedule = match CronSchedule::parse(&job.schedule_cron, &job.timezone) {
            Ok(schedule) => schedule,
            Err(e) => {
                error!(
                    job = %job.name,
                    cron = %job.schedule_cron,
                    timezone = %job.timezone,
                    error = %e,
                    "invalid schedule; job not scheduled"
                );
                self.unschedule(job.id);
                return Err(e);
            }
        };

        let next = self
            .shared
            .table()
            .insert(job.id, job.name.clone(), schedule, self.shared.clock.now());
        self.shared.persist_next_run(job.id, next);
        self.shared.wake.notify_one();

        match next {
            Some(at) => info!(job = %job.name, cron = %job.schedule_cron, timezone = %job.timezone, next_run = %at, "scheduled job"),
            None => warn!(job = %job.name, cron = %job.schedule_cron, "schedule never fires"),
        }
        Ok(next)
    }

    /// Remove the trigger for `job_id`, if any, and clear its `next_run_at`.
    /// Returns `true` if a trigger was removed.
    pub fn unschedule(&self, job_id: JobId) -> bool {
        let removed = self.shared.table().remove(job_id);
        if removed {
            info!(job_id, "unscheduled job");
            self.shared.persist_next_run(job_id, None);
            self.shared.wake.notify_one();
        }
        removed
    }

    /// Run a job immediately, outside its schedule, and wait for the result.
    pub async fn run_now(&self, job_id: JobId) -> RunRecord {
        info!(job_id, "manual run requested");
        self.shared.executor.run(job_id).await
    }

    pub fn next_fire(&self, job_id: JobId) -> Option<DateTime<Utc>> {
        self.shared.table().next_fire(job_id)
    }

    pub fn scheduled_jobs(&self) -> Vec<JobId> {
        self.shared.table().job_ids()
    }

    /// Make the trigger loop re-read the clock and fire anything now due.
    pub fn wake(&self) {
        self.shared.wake.notify_one();
    }
}

async fn trigger_loop(
    shared: Arc<Shared>,
    dispatch_tx: mpsc::Sender<JobId>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("trigger loop started");

    loop {
        let due = shared.table().take_due(shared.clock.now());
        for job in due {
            info!(
                job = %job.job_name,
                fired_at = %job.fired_at,
                next_run = ?job.next_fire,
                "trigger fired"
            );
            shared.persist_next_run(job.job_id, job.next_fire);
            if dispatch_tx.send(job.job_id).await.is_err() {
                warn!("dispatch queue closed; stopping trigger loop");
                return;
            }
        }

        let sleep_for = shared
            .table()
            .earliest()
            .map(|at| (at - shared.clock.now()).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(MAX_SLEEP)
            .min(MAX_SLEEP);

        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = shared.wake.notified() => {
                debug!("trigger table changed; recomputing");
            }
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }

    info!("trigger loop finished");
}
