//! De-duplication of job processing across overlapping sweeps.

use chrono::{DateTime, TimeDelta, Utc};
use ort_core::Clock;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Subtracts an age from a point in time, saturating at the earliest
/// representable time.
pub(crate) fn before(now: DateTime<Utc>, age: TimeDelta) -> DateTime<Utc> {
    now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Default)]
struct State {
    /// Processing times in ascending order. The sequence number keeps entries
    /// with equal timestamps apart.
    processing_times: BTreeMap<(DateTime<Utc>, u64), String>,
    names: HashSet<String>,
    sequence: u64,
}

impl State {
    fn evict_before(&mut self, threshold: DateTime<Utc>) {
        while let Some(entry) = self.processing_times.first_entry() {
            if entry.key().0 >= threshold {
                break;
            }
            let name = entry.remove();
            self.names.remove(&name);
        }
    }
}

/// Names of the jobs processed within a recency window.
///
/// The watcher and the Reaper may see the same finished job at nearly the
/// same time; only the first one to ask gets to process it.
pub struct RecentlyProcessedJobs {
    window: TimeDelta,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl RecentlyProcessedJobs {
    #[must_use]
    pub fn new(window: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            state: Mutex::new(State::default()),
        }
    }

    /// Returns `true` and records the job if it was not processed within the
    /// window, `false` otherwise.
    pub fn can_process(&self, job_name: &str) -> bool {
        let now = self.clock.now();
        let threshold = before(now, self.window);

        let mut state = self.state.lock();
        state.evict_before(threshold);

        if state.names.contains(job_name) {
            return false;
        }

        state.sequence += 1;
        let sequence = state.sequence;
        state.names.insert(job_name.to_string());
        state
            .processing_times
            .insert((now, sequence), job_name.to_string());
        true
    }

    /// Number of jobs currently remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::at;
    use ort_core::ManualClock;

    fn guard(clock: &Arc<ManualClock>) -> RecentlyProcessedJobs {
        RecentlyProcessedJobs::new(TimeDelta::seconds(60), clock.clone())
    }

    #[test]
    fn test_second_request_within_window_is_rejected() {
        let clock = Arc::new(ManualClock::new(at(0)));
        let recent = guard(&clock);

        assert!(recent.can_process("analyzer-1"));
        clock.advance(TimeDelta::seconds(30));
        assert!(!recent.can_process("analyzer-1"));
        assert!(recent.can_process("analyzer-2"));
        assert_eq!(recent.len(), 2);
    }

    #[test]
    fn test_job_can_be_processed_again_after_window() {
        let clock = Arc::new(ManualClock::new(at(0)));
        let recent = guard(&clock);

        assert!(recent.can_process("analyzer-1"));
        clock.advance(TimeDelta::seconds(61));
        assert!(recent.can_process("analyzer-1"));
    }

    #[test]
    fn test_eviction_removes_only_old_entries() {
        let clock = Arc::new(ManualClock::new(at(0)));
        let recent = guard(&clock);

        assert!(recent.can_process("old"));
        clock.advance(TimeDelta::seconds(40));
        assert!(recent.can_process("young"));
        clock.advance(TimeDelta::seconds(30));

        assert!(recent.can_process("old"));
        assert!(!recent.can_process("young"));
    }

    #[test]
    fn test_same_timestamp_entries_are_kept_apart() {
        let clock = Arc::new(ManualClock::new(at(0)));
        let recent = guard(&clock);

        assert!(recent.can_process("a"));
        assert!(recent.can_process("b"));
        assert!(recent.can_process("c"));
        assert_eq!(recent.len(), 3);

        clock.advance(TimeDelta::seconds(61));
        assert!(recent.can_process("d"));
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn test_concurrent_requests_admit_one_caller() {
        let clock = Arc::new(ManualClock::new(at(0)));
        let recent = Arc::new(guard(&clock));

        let admitted: usize = (0..8)
            .map(|_| {
                let recent = recent.clone();
                std::thread::spawn(move || recent.can_process("shared"))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| usize::from(handle.join().unwrap()))
            .sum();

        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_before_saturates() {
        assert_eq!(before(at(0), TimeDelta::MAX), DateTime::<Utc>::MIN_UTC);
        assert_eq!(before(at(10), TimeDelta::seconds(10)), at(0));
    }
}
