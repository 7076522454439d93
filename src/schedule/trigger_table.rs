// src/schedule/trigger_table.rs

//! Pure trigger bookkeeping.
//!
//! The table maps job ids to their cron schedule and next fire instant. It
//! has no clock, no channels and no Tokio types: callers pass `now` in, which
//! keeps every decision here deterministic and unit-testable. The async shell
//! in [`super::scheduler`] owns one table behind a mutex.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::JobId;

use super::cron::CronSchedule;

/// One registered job trigger.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub job_id: JobId,
    pub job_name: String,
    pub schedule: CronSchedule,
    /// `None` when the expression can never fire again.
    pub next_fire: Option<DateTime<Utc>>,
}

/// A trigger that came due in [`TriggerTable::take_due`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueJob {
    pub job_id: JobId,
    pub job_name: String,
    pub fired_at: DateTime<Utc>,
    pub next_fire: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct TriggerTable {
    triggers: HashMap<JobId, Trigger>,
}

impl TriggerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the trigger for `job_id` and return its next fire
    /// instant after `now`.
    pub fn insert(
        &mut self,
        job_id: JobId,
        job_name: impl Into<String>,
        schedule: CronSchedule,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let next_fire = schedule.next_after(now);
        let replaced = self
            .triggers
            .insert(
                job_id,
                Trigger {
                    job_id,
                    job_name: job_name.into(),
                    schedule,
                    next_fire,
                },
            )
            .is_some();
        debug!(job_id, replaced, next_fire = ?next_fire, "trigger registered");
        next_fire
    }

    /// Returns `true` if a trigger was removed.
    pub fn remove(&mut self, job_id: JobId) -> bool {
        self.triggers.remove(&job_id).is_some()
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.triggers.contains_key(&job_id)
    }

    pub fn get(&self, job_id: JobId) -> Option<&Trigger> {
        self.triggers.get(&job_id)
    }

    pub fn next_fire(&self, job_id: JobId) -> Option<DateTime<Utc>> {
        self.triggers.get(&job_id).and_then(|t| t.next_fire)
    }

    /// Earliest pending fire instant across all triggers.
    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.triggers.values().filter_map(|t| t.next_fire).min()
    }

    /// Pop every trigger whose fire instant is `<= now` and advance it.
    ///
    /// A trigger that missed several fire instants (the process was asleep or
    /// busy) fires once; its next fire is computed from `now`, not from the
    /// missed instant. Results are ordered by fire instant, then job id.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<DueJob> {
        let mut due: Vec<DueJob> = self
            .triggers
            .values_mut()
            .filter_map(|trigger| {
                let fired_at = trigger.next_fire.filter(|at| *at <= now)?;
                trigger.next_fire = trigger.schedule.next_after(now);
                Some(DueJob {
                    job_id: trigger.job_id,
                    job_name: trigger.job_name.clone(),
                    fired_at,
                    next_fire: trigger.next_fire,
                })
            })
            .collect();
        due.sort_by(|a, b| a.fired_at.cmp(&b.fired_at).then(a.job_id.cmp(&b.job_id)));
        due
    }

    /// Registered job ids, ascending.
    pub fn job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.triggers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, m, 0).unwrap()
    }

    fn every(minutes: u32) -> CronSchedule {
        CronSchedule::parse(&format!("*/{minutes} * * * *"), "UTC").unwrap()
    }

    #[test]
    fn insert_replaces_existing_trigger() {
        let mut table = TriggerTable::new();
        table.insert(1, "home", every(5), at(10, 1));
        let next = table.insert(1, "home", every(30), at(10, 1));

        assert_eq!(table.len(), 1);
        assert_eq!(next, Some(at(10, 30)));
        assert_eq!(table.next_fire(1), Some(at(10, 30)));
    }

    #[test]
    fn take_due_fires_and_advances() {
        let mut table = TriggerTable::new();
        table.insert(1, "a", every(5), at(10, 0));
        table.insert(2, "b", every(30), at(10, 0));

        assert!(table.take_due(at(10, 4)).is_empty());
        assert_eq!(table.earliest(), Some(at(10, 5)));

        let due = table.take_due(at(10, 5));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].job_id, 1);
        assert_eq!(due[0].fired_at, at(10, 5));
        assert_eq!(due[0].next_fire, Some(at(10, 10)));
        assert_eq!(table.next_fire(2), Some(at(10, 30)));
    }

    #[test]
    fn missed_fires_coalesce_into_one() {
        let mut table = TriggerTable::new();
        table.insert(1, "a", every(5), at(10, 0));

        let due = table.take_due(at(10, 17));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].fired_at, at(10, 5));
        assert_eq!(table.next_fire(1), Some(at(10, 20)));
    }

    #[test]
    fn remove_and_queries() {
        let mut table = TriggerTable::new();
        table.insert(3, "c", every(5), at(10, 0));
        table.insert(1, "a", every(5), at(10, 0));

        assert_eq!(table.job_ids(), vec![1, 3]);
        assert!(table.remove(3));
        assert!(!table.remove(3));
        assert!(!table.contains(3));
        assert_eq!(table.next_fire(3), None);
        assert_eq!(table.get(1).map(|t| t.job_name.as_str()), Some("a"));
    }

    #[test]
    fn never_firing_trigger_has_no_next_fire() {
        let mut table = TriggerTable::new();
        let never = CronSchedule::parse("0 0 30 2 *", "UTC").unwrap();
        assert_eq!(table.insert(1, "never", never, at(10, 0)), None);
        assert_eq!(table.earliest(), None);
        assert!(table.take_due(at(23, 59)).is_empty());
    }
}
