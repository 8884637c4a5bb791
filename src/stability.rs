//! Pid-set churn heuristic.
//!
//! A sudden burst of pids never seen in the previous cycle usually means the
//! accounting stream was corrupted or the command restarted mid-stream. A
//! genuine burst of short-lived processes also trips it; that only costs one
//! extra restart.

use ahash::AHashSet as HashSet;

use crate::ledger::Pid;

/// True when more than `threshold` pids in `current` are absent from
/// `previous`.
pub fn check(previous: &HashSet<Pid>, current: &HashSet<Pid>, threshold: usize) -> bool {
    new_pid_count(previous, current) > threshold
}

pub fn new_pid_count(previous: &HashSet<Pid>, current: &HashSet<Pid>) -> usize {
    current.difference(previous).count()
}

/// Keeps the previous cycle's pid set between checks.
#[derive(Debug, Clone)]
pub struct StabilityMonitor {
    threshold: usize,
    previous: Option<HashSet<Pid>>,
}

impl StabilityMonitor {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            previous: None,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Records this cycle's pids and reports whether they desync from the
    /// last cycle. The first observation only sets the baseline.
    pub fn observe(&mut self, current: &HashSet<Pid>) -> bool {
        let desync = self
            .previous
            .as_ref()
            .is_some_and(|previous| check(previous, current, self.threshold));
        self.previous = Some(current.clone());
        desync
    }

    /// Pids in `current` missing from the last observation. Zero before the
    /// first one.
    pub fn new_pids(&self, current: &HashSet<Pid>) -> usize {
        self.previous
            .as_ref()
            .map_or(0, |previous| new_pid_count(previous, current))
    }

    /// Forgets the pid history.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pids: &[Pid]) -> HashSet<Pid> {
        pids.iter().copied().collect()
    }

    #[test]
    fn test_exactly_threshold_new_pids_is_stable() {
        let prev = set(&[1, 2, 3]);
        let cur = set(&[1, 2, 3, 10, 11, 12]);
        assert!(!check(&prev, &cur, 3));
    }

    #[test]
    fn test_threshold_plus_one_is_desync() {
        let prev = set(&[1, 2, 3]);
        let cur = set(&[1, 2, 3, 10, 11, 12, 13]);
        assert!(check(&prev, &cur, 3));
    }

    #[test]
    fn test_departed_pids_do_not_count() {
        let prev = set(&[1, 2, 3, 4, 5, 6]);
        let cur = set(&[1]);
        assert_eq!(new_pid_count(&prev, &cur), 0);
        assert!(!check(&prev, &cur, 0));
    }

    #[test]
    fn test_threshold_one() {
        let prev = set(&[1]);
        assert!(!check(&prev, &set(&[1, 2]), 1));
        assert!(check(&prev, &set(&[1, 2, 3]), 1));
    }

    #[test]
    fn test_first_observation_is_baseline() {
        let mut monitor = StabilityMonitor::new(1);
        assert!(!monitor.observe(&set(&[1, 2, 3, 4, 5])));
        assert!(!monitor.observe(&set(&[1, 2, 3, 4, 5, 6])));
        assert!(monitor.observe(&set(&[7, 8])));
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut monitor = StabilityMonitor::new(0);
        monitor.observe(&set(&[1]));
        monitor.reset();
        assert!(!monitor.observe(&set(&[2, 3])));
    }
}
