//! Running statistics about sampling cycles.
//!
//! Updated by the sampling task, read by the front-end's `/health` table.

use std::fmt::Write as FmtWrite;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};
use std::time::Instant;

/// Summary of one measurement taken once per cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatSnapshot {
    pub current: f64,
    pub average: f64,
    pub max: f64,
    pub min: f64,
    pub count: u64,
}

impl StatSnapshot {
    fn with_sample(self, value: f64) -> Self {
        if self.count == 0 {
            return Self {
                current: value,
                average: value,
                max: value,
                min: value,
                count: 1,
            };
        }
        let count = self.count + 1;
        Self {
            current: value,
            // incremental mean
            average: self.average + (value - self.average) / count as f64,
            max: self.max.max(value),
            min: self.min.min(value),
            count,
        }
    }
}

#[derive(Default)]
struct Series(Mutex<StatSnapshot>);

impl Series {
    fn push(&self, value: f64) {
        if let Ok(mut stat) = self.0.lock() {
            *stat = stat.with_sample(value);
        }
    }

    fn snapshot(&self) -> StatSnapshot {
        self.0.lock().map(|stat| *stat).unwrap_or_default()
    }
}

pub struct HealthStats {
    processes_per_cycle: Series,
    cycle_duration_seconds: Series,
    total_cycles: AtomicU64,
    restarts: AtomicU64,
    failed_invocations: AtomicU64,
    dropped_lines: AtomicU64,
    started: Instant,
}

impl Default for HealthStats {
    fn default() -> Self {
        Self {
            processes_per_cycle: Series::default(),
            cycle_duration_seconds: Series::default(),
            total_cycles: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            failed_invocations: AtomicU64::new(0),
            dropped_lines: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl HealthStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_cycle(&self, processes: u64, duration_seconds: f64, dropped_lines: u64) {
        self.processes_per_cycle.push(processes as f64);
        self.cycle_duration_seconds.push(duration_seconds);
        self.total_cycles.fetch_add(1, Ordering::Relaxed);
        self.dropped_lines.fetch_add(dropped_lines, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles.load(Ordering::Relaxed)
    }

    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    pub fn failed_invocations(&self) -> u64 {
        self.failed_invocations.load(Ordering::Relaxed)
    }

    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines.load(Ordering::Relaxed)
    }

    pub fn processes_per_cycle(&self) -> StatSnapshot {
        self.processes_per_cycle.snapshot()
    }

    pub fn cycle_duration(&self) -> StatSnapshot {
        self.cycle_duration_seconds.snapshot()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Plain-text table for `/health`.
    pub fn render_table(&self) -> String {
        let label_w = 22usize;
        let col_w = 12usize;

        let row = |out: &mut String, cells: [&str; 5]| {
            let [label, current, average, max, min] = cells;
            writeln!(
                out,
                "{label:label_w$} | {current:^col_w$} | {average:^col_w$} | {max:^col_w$} | {min:^col_w$}"
            )
            .ok();
        };

        let procs = self.processes_per_cycle();
        let dur = self.cycle_duration();
        let mut out = String::new();

        row(&mut out, ["metric", "current", "average", "max", "min"]);
        writeln!(out, "{}", "-".repeat(label_w + 3 + (col_w + 3) * 4)).ok();
        row(
            &mut out,
            [
                "processes per cycle",
                format!("{:.0}", procs.current).as_str(),
                format!("{:.1}", procs.average).as_str(),
                format!("{:.0}", procs.max).as_str(),
                format!("{:.0}", procs.min).as_str(),
            ],
        );
        row(
            &mut out,
            [
                "cycle duration (s)",
                format!("{:.3}", dur.current).as_str(),
                format!("{:.3}", dur.average).as_str(),
                format!("{:.3}", dur.max).as_str(),
                format!("{:.3}", dur.min).as_str(),
            ],
        );

        writeln!(out).ok();
        for (label, value) in [
            ("completed cycles:", self.total_cycles()),
            ("session restarts:", self.restarts()),
            ("failed invocations:", self.failed_invocations()),
            ("dropped lines:", self.dropped_lines()),
            ("uptime (s):", self.uptime_seconds()),
        ] {
            writeln!(out, "{label:<20}{value}").ok();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stat() {
        let stats = HealthStats::new();
        stats.record_cycle(10, 0.2, 0);
        stats.record_cycle(20, 0.4, 3);
        stats.record_cycle(15, 0.3, 0);

        let procs = stats.processes_per_cycle();
        assert_eq!(procs.current, 15.0);
        assert_eq!(procs.average, 15.0);
        assert_eq!(procs.max, 20.0);
        assert_eq!(procs.min, 10.0);
        assert_eq!(procs.count, 3);
        assert_eq!(stats.total_cycles(), 3);
        assert_eq!(stats.dropped_lines(), 3);
    }

    #[test]
    fn test_counters_and_table() {
        let stats = HealthStats::new();
        stats.record_restart();
        stats.record_failure();
        stats.record_failure();
        let table = stats.render_table();
        assert!(table.contains("session restarts:   1"));
        assert!(table.contains("failed invocations: 2"));
        assert!(table.contains("processes per cycle"));
    }
}
