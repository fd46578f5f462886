//! Due-ness bookkeeping for repeating sequences.
//!
//! The scheduler holds a snapshot of every sequence's schedule and decides
//! which are due at a given instant. It never talks to devices; the control
//! loop hands due sequences to the executor.

use crate::cycle::cycle_position;
use crate::sequence::Sequence;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    enabled: bool,
    cycle_duration: u32,
    last_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    entries: BTreeMap<String, Entry>,
    running: Option<(String, Uuid)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sequences(sequences: &[Sequence]) -> Self {
        let mut scheduler = Self::new();
        scheduler.sync(sequences);
        scheduler
    }

    /// Refresh definitions from the store. Sequences that disappeared are
    /// dropped. A `last_run` recorded in memory but not yet visible in the
    /// stored copy wins.
    pub fn sync(&mut self, sequences: &[Sequence]) {
        let mut next = BTreeMap::new();
        for seq in sequences {
            let known = self.entries.get(&seq.id).and_then(|e| e.last_run);
            next.insert(
                seq.id.clone(),
                Entry {
                    enabled: seq.enabled,
                    cycle_duration: seq.cycle_duration,
                    last_run: seq.last_run.max(known),
                },
            );
        }
        self.entries = next;
    }

    /// Sequences due at `now`, most overdue first.
    ///
    /// Disabled, manual-only and currently running sequences are skipped.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut due: Vec<(Option<DateTime<Utc>>, &String)> = self
            .entries
            .iter()
            .filter_map(|(id, e)| self.next_due(id, e, now).map(|at| (at, id)))
            .collect();
        // Never-run (None) sorts before any timestamp.
        due.sort();
        due.into_iter().map(|(_, id)| id.clone()).collect()
    }

    /// Whether `id` is still due at `now`.
    pub fn is_due(&self, id: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .get(id)
            .is_some_and(|e| self.next_due(id, e, now).is_some())
    }

    fn next_due(&self, id: &str, e: &Entry, now: DateTime<Utc>) -> Option<Option<DateTime<Utc>>> {
        let running = self.running.as_ref().is_some_and(|(r, _)| r == id);
        if !e.enabled || e.cycle_duration == 0 || running {
            return None;
        }
        let pos = cycle_position(now, e.last_run, e.cycle_duration);
        pos.due.then_some(pos.next_due_at)
    }

    pub fn notify_started(&mut self, id: &str, run_id: Uuid) {
        self.running = Some((id.to_string(), run_id));
    }

    /// Record a finished run. Only the run that was started last releases
    /// the running mark.
    pub fn notify_completed(&mut self, id: &str, run_id: Uuid, completed_at: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.last_run = entry.last_run.max(Some(completed_at));
        }
        if self.running.as_ref().is_some_and(|(_, r)| *r == run_id) {
            self.running = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn seq(id: &str, cycle: u32, last_run: Option<DateTime<Utc>>) -> Sequence {
        let mut s = Sequence::new(id, id, cycle);
        s.last_run = last_run;
        s
    }

    #[test]
    fn scenario_a_fires_at_cycle_boundary_not_before() {
        let scheduler = Scheduler::from_sequences(&[seq("drill", 10, Some(t0()))]);
        let just_before = t0() + Duration::minutes(9) + Duration::seconds(59);
        assert!(scheduler.due(just_before).is_empty());
        assert_eq!(scheduler.due(t0() + Duration::minutes(10)), vec!["drill"]);
    }

    #[test]
    fn disabled_and_manual_are_skipped() {
        let mut disabled = seq("off", 5, None);
        disabled.enabled = false;
        let scheduler = Scheduler::from_sequences(&[disabled, seq("manual", 0, None)]);
        assert!(scheduler.due(t0()).is_empty());
    }

    #[test]
    fn running_sequence_is_skipped_until_completed() {
        let mut scheduler = Scheduler::from_sequences(&[seq("drill", 10, None)]);
        let run = Uuid::new_v4();
        scheduler.notify_started("drill", run);
        assert!(scheduler.due(t0()).is_empty());
        assert!(!scheduler.is_due("drill", t0()));

        scheduler.notify_completed("drill", run, t0());
        assert!(scheduler.due(t0() + Duration::minutes(9)).is_empty());
        assert_eq!(scheduler.due(t0() + Duration::minutes(10)), vec!["drill"]);
    }

    #[test]
    fn stale_completion_does_not_release_a_newer_run() {
        let mut scheduler = Scheduler::from_sequences(&[seq("drill", 10, None)]);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        scheduler.notify_started("drill", first);
        scheduler.notify_started("drill", second);

        scheduler.notify_completed("drill", first, t0());
        assert!(!scheduler.is_due("drill", t0() + Duration::hours(1)));

        scheduler.notify_completed("drill", second, t0() + Duration::minutes(1));
        assert!(scheduler.is_due("drill", t0() + Duration::hours(1)));
    }

    #[test]
    fn completion_makes_a_queued_sequence_no_longer_due() {
        let mut scheduler = Scheduler::from_sequences(&[seq("drill", 10, None)]);
        assert!(scheduler.is_due("drill", t0()));
        let run = Uuid::new_v4();
        scheduler.notify_started("drill", run);
        scheduler.notify_completed("drill", run, t0());
        assert!(!scheduler.is_due("drill", t0() + Duration::seconds(1)));
        assert!(!scheduler.is_due("unknown", t0()));
    }

    #[test]
    fn due_orders_most_overdue_first() {
        let scheduler = Scheduler::from_sequences(&[
            seq("a-recent", 5, Some(t0())),
            seq("b-old", 5, Some(t0() - Duration::hours(1))),
            seq("c-never", 5, None),
        ]);
        assert_eq!(
            scheduler.due(t0() + Duration::minutes(30)),
            vec!["c-never", "b-old", "a-recent"]
        );
    }

    #[test]
    fn sync_keeps_newer_in_memory_last_run() {
        let mut scheduler = Scheduler::from_sequences(&[seq("drill", 10, None)]);
        scheduler.notify_completed("drill", Uuid::new_v4(), t0());
        scheduler.sync(&[seq("drill", 10, None)]);
        assert!(!scheduler.is_due("drill", t0() + Duration::minutes(9)));
        assert!(scheduler.is_due("drill", t0() + Duration::minutes(10)));
    }

    #[test]
    fn sync_drops_deleted_sequences() {
        let mut scheduler = Scheduler::from_sequences(&[seq("a", 1, None), seq("b", 1, None)]);
        scheduler.sync(&[seq("b", 1, None)]);
        assert_eq!(scheduler.due(t0()), vec!["b"]);
        assert!(!scheduler.is_due("a", t0()));
    }
}
