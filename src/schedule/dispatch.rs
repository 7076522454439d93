// src/schedule/dispatch.rs

//! Dispatch queue between the trigger loop and the execution engine.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::engine::JobExecutor;
use crate::types::JobId;

const DISPATCH_QUEUE_CAPACITY: usize = 64;

/// Spawn the background dispatcher.
///
/// Every job id received on the returned sender is executed in its own Tokio
/// task, so runs of different jobs (and, unless the executor is configured
/// for exclusive runs, of the same job) overlap freely. When the sender is
/// dropped the dispatcher waits for in-flight runs and then exits.
pub fn spawn_dispatcher(executor: Arc<JobExecutor>) -> (mpsc::Sender<JobId>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<JobId>(DISPATCH_QUEUE_CAPACITY);

    let handle = tokio::spawn(async move {
        info!("dispatcher started");
        let mut runs: JoinSet<()> = JoinSet::new();

        while let Some(job_id) = rx.recv().await {
            let executor = executor.clone();
            runs.spawn(async move {
                let run = executor.run(job_id).await;
                debug!(job_id, run_id = run.id, status = %run.status, "dispatched run finished");
            });

            while let Some(res) = runs.try_join_next() {
                log_join_error(res);
            }
        }

        if !runs.is_empty() {
            info!(in_flight = runs.len(), "dispatcher stopping; waiting for running jobs");
        }
        while let Some(res) = runs.join_next().await {
            log_join_error(res);
        }
        info!("dispatcher finished (queue closed)");
    });

    (tx, handle)
}

fn log_join_error(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        warn!(error = %e, "run task ended abnormally");
    }
}
