// src/schedule/mod.rs

//! Cron-driven triggering of backup jobs.
//!
//! - [`cron`] parses crontab expressions and computes fire instants in a
//!   job's timezone.
//! - [`trigger_table`] is the pure job-id → next-fire bookkeeping.
//! - [`scheduler`] is the async shell: trigger loop, `schedule`,
//!   `unschedule`, `run_now`.
//! - [`dispatch`] runs due jobs, one Tokio task per run.
//! - [`clock`] supplies the current instant to the scheduler.

pub mod clock;
pub mod cron;
pub mod dispatch;
pub mod scheduler;
pub mod trigger_table;

pub use clock::{Clock, SystemClock};
pub use cron::{CronExpr, CronParseError, CronSchedule};
pub use scheduler::Scheduler;
pub use trigger_table::{DueJob, TriggerTable};
