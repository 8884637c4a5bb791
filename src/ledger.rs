//! Per-process byte counters.
//!
//! The accounting command reports running totals per process, so each
//! record keeps the totals of the previous and the current cycle and the
//! rate is derived from their difference. Records are keyed by pid; a pid
//! reused by a new process is indistinguishable from the old one.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::error::LineParseError;

pub type Pid = u32;

/// One data line of the accounting output, tokenized.
///
/// Layout: `<time> <name>.<pid> <bytes_in> <bytes_out>`. Process names may
/// contain spaces, so the label is everything between the leading time
/// column and the two byte columns, and the pid is the text after the
/// label's final `.`. The time column is not kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficRow {
    pub label: String,
    pub pid: Pid,
    /// Downstream running total.
    pub bytes_in: u64,
    /// Upstream running total.
    pub bytes_out: u64,
}

impl TrafficRow {
    pub fn parse(line: &str) -> Result<Self, LineParseError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let n = tokens.len();
        if n < 3 {
            return Err(LineParseError::TooFewTokens(n));
        }

        let bytes_in = parse_bytes("bytes_in", tokens[n - 2])?;
        let bytes_out = parse_bytes("bytes_out", tokens[n - 1])?;

        // three tokens means the time column is missing
        let label = if n == 3 {
            tokens[0].to_string()
        } else {
            tokens[1..n - 2].join(" ")
        };

        let (_, pid_text) = label
            .rsplit_once('.')
            .ok_or_else(|| LineParseError::MissingPidSeparator(label.clone()))?;
        let pid = pid_text
            .parse::<Pid>()
            .map_err(|_| LineParseError::InvalidPid(pid_text.to_string()))?;

        Ok(Self {
            label,
            pid,
            bytes_in,
            bytes_out,
        })
    }

    /// Process name without the `.<pid>` suffix.
    pub fn name(&self) -> &str {
        self.label
            .rsplit_once('.')
            .map_or(self.label.as_str(), |(name, _)| name)
    }
}

fn parse_bytes(field: &'static str, value: &str) -> Result<u64, LineParseError> {
    value.parse().map_err(|_| LineParseError::InvalidBytes {
        field,
        value: value.to_string(),
    })
}

/// Double-buffered counters for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteCounterRecord {
    pub pid: Pid,
    pub name: String,
    pub up_prev: u64,
    pub up_cur: u64,
    pub down_prev: u64,
    pub down_cur: u64,
}

impl ByteCounterRecord {
    fn new(pid: Pid, name: String) -> Self {
        Self {
            pid,
            name,
            up_prev: 0,
            up_cur: 0,
            down_prev: 0,
            down_cur: 0,
        }
    }

    fn rotate(&mut self) {
        self.up_prev = self.up_cur;
        self.down_prev = self.down_cur;
        self.up_cur = 0;
        self.down_cur = 0;
    }

    pub fn up_delta(&self) -> u64 {
        self.up_cur.saturating_sub(self.up_prev)
    }

    pub fn down_delta(&self) -> u64 {
        self.down_cur.saturating_sub(self.down_prev)
    }

    /// Ranking key.
    pub fn combined_delta(&self) -> u64 {
        self.up_delta().saturating_add(self.down_delta())
    }
}

/// Cycle-scoped sums across all processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateCounters {
    pub up_prev: u64,
    pub up_cur: u64,
    pub down_prev: u64,
    pub down_cur: u64,
}

impl AggregateCounters {
    fn rotate(&mut self) {
        self.up_prev = self.up_cur;
        self.down_prev = self.down_cur;
        self.up_cur = 0;
        self.down_cur = 0;
    }
}

/// Records ordered by descending combined delta, published once per cycle.
///
/// Cheap to clone; readers never mutate it.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    records: Arc<Vec<ByteCounterRecord>>,
}

impl LedgerSnapshot {
    pub fn records(&self) -> &[ByteCounterRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The first `n` records (fewer if fewer are tracked).
    pub fn top(&self, n: usize) -> &[ByteCounterRecord] {
        &self.records[..n.min(self.records.len())]
    }
}

/// The pid-keyed ledger owned by one sampling session.
#[derive(Debug, Default)]
pub struct ProcessByteLedger {
    records: HashMap<Pid, ByteCounterRecord>,
    aggregate: AggregateCounters,
    seen: HashSet<Pid>,
}

impl ProcessByteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rotates every counter `cur -> prev` and zeroes `cur`.
    ///
    /// A process that stays silent this cycle therefore contributes a zero
    /// delta. Records that were already silent in the previous cycle are
    /// dropped: if they come back, a fresh record has the same baseline.
    pub fn begin_cycle(&mut self) {
        self.aggregate.rotate();
        self.seen.clear();
        self.records.retain(|_, rec| {
            rec.rotate();
            rec.up_prev != 0 || rec.down_prev != 0
        });
    }

    /// Applies one data line.
    ///
    /// A pid appearing twice in one cycle keeps the later line's totals: the
    /// values are running totals, not increments, so they replace rather
    /// than accumulate.
    pub fn apply_line(&mut self, line: &str) -> Result<Pid, LineParseError> {
        let row = TrafficRow::parse(line)?;
        self.apply_row(&row);
        Ok(row.pid)
    }

    pub fn apply_row(&mut self, row: &TrafficRow) {
        let rec = self
            .records
            .entry(row.pid)
            .or_insert_with(|| ByteCounterRecord::new(row.pid, row.name().to_string()));

        if !self.seen.insert(row.pid) {
            debug!(pid = row.pid, "pid repeated within one cycle, keeping later totals");
            self.aggregate.up_cur = self.aggregate.up_cur.saturating_sub(rec.up_cur);
            self.aggregate.down_cur = self.aggregate.down_cur.saturating_sub(rec.down_cur);
        }

        rec.up_cur = row.bytes_out;
        rec.down_cur = row.bytes_in;
        if rec.name != row.name() {
            rec.name = row.name().to_string();
        }

        self.aggregate.up_cur = self.aggregate.up_cur.saturating_add(row.bytes_out);
        self.aggregate.down_cur = self.aggregate.down_cur.saturating_add(row.bytes_in);
    }

    pub fn aggregate(&self) -> AggregateCounters {
        self.aggregate
    }

    pub fn get(&self, pid: Pid) -> Option<&ByteCounterRecord> {
        self.records.get(&pid)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Pids that reported at least one line this cycle.
    pub fn cycle_pids(&self) -> &HashSet<Pid> {
        &self.seen
    }

    /// Sorted copy for readers outside the sampling task.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut records: Vec<ByteCounterRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| {
            b.combined_delta()
                .cmp(&a.combined_delta())
                .then(a.pid.cmp(&b.pid))
        });
        LedgerSnapshot {
            records: Arc::new(records),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_row() {
        let row = TrafficRow::parse("12:00:01.123456 Safari.4123   10240   2048").unwrap();
        assert_eq!(row.label, "Safari.4123");
        assert_eq!(row.name(), "Safari");
        assert_eq!(row.pid, 4123);
        assert_eq!(row.bytes_in, 10240);
        assert_eq!(row.bytes_out, 2048);
    }

    #[test]
    fn test_parse_row_name_with_spaces_and_dots() {
        let row = TrafficRow::parse("12:00:01 Google Chrome He.v2.77  5  6").unwrap();
        assert_eq!(row.label, "Google Chrome He.v2.77");
        assert_eq!(row.name(), "Google Chrome He.v2");
        assert_eq!(row.pid, 77);
    }

    #[test]
    fn test_parse_row_without_time_column() {
        let row = TrafficRow::parse("mDNSResponder.190 1 2").unwrap();
        assert_eq!(row.label, "mDNSResponder.190");
        assert_eq!(row.pid, 190);
    }

    #[test]
    fn test_parse_row_errors() {
        assert_eq!(
            TrafficRow::parse("a b"),
            Err(LineParseError::TooFewTokens(2))
        );
        assert!(matches!(
            TrafficRow::parse("12:00 Safari.1 12x 5"),
            Err(LineParseError::InvalidBytes { field: "bytes_in", .. })
        ));
        assert!(matches!(
            TrafficRow::parse("12:00 Safari.1 12 -5"),
            Err(LineParseError::InvalidBytes { field: "bytes_out", .. })
        ));
        assert!(matches!(
            TrafficRow::parse("12:00 kernel_task 1 2"),
            Err(LineParseError::MissingPidSeparator(_))
        ));
        assert!(matches!(
            TrafficRow::parse("12:00 kernel.task 1 2"),
            Err(LineParseError::InvalidPid(_))
        ));
    }

    #[test]
    fn test_new_record_starts_from_zero() {
        let mut ledger = ProcessByteLedger::new();
        ledger.begin_cycle();
        ledger.apply_line("t Safari.10 300 100").unwrap();
        let rec = ledger.get(10).unwrap();
        assert_eq!((rec.up_prev, rec.up_cur), (0, 100));
        assert_eq!((rec.down_prev, rec.down_cur), (0, 300));
        assert_eq!(rec.combined_delta(), 400);
    }

    #[test]
    fn test_rotation_and_deltas() {
        let mut ledger = ProcessByteLedger::new();
        ledger.begin_cycle();
        ledger.apply_line("t Safari.10 300 100").unwrap();
        ledger.apply_line("t curl.11 50 50").unwrap();

        ledger.begin_cycle();
        ledger.apply_line("t Safari.10 1300 150").unwrap();

        let safari = ledger.get(10).unwrap();
        assert_eq!(safari.down_delta(), 1000);
        assert_eq!(safari.up_delta(), 50);

        // silent this cycle: zero current, no stale delta
        let curl = ledger.get(11).unwrap();
        assert_eq!(curl.up_cur, 0);
        assert_eq!(curl.combined_delta(), 0);

        let agg = ledger.aggregate();
        assert_eq!((agg.down_prev, agg.down_cur), (350, 1300));
        assert_eq!((agg.up_prev, agg.up_cur), (150, 150));
    }

    #[test]
    fn test_silent_records_are_pruned() {
        let mut ledger = ProcessByteLedger::new();
        ledger.begin_cycle();
        ledger.apply_line("t curl.11 50 50").unwrap();
        ledger.begin_cycle();
        assert!(ledger.get(11).is_some());
        ledger.begin_cycle();
        assert!(ledger.get(11).is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_duplicate_pid_replaces() {
        let mut ledger = ProcessByteLedger::new();
        ledger.begin_cycle();
        ledger.apply_line("t Safari.10 300 100").unwrap();
        ledger.apply_line("t Safari.10 500 200").unwrap();
        let rec = ledger.get(10).unwrap();
        assert_eq!((rec.down_cur, rec.up_cur), (500, 200));
        let agg = ledger.aggregate();
        assert_eq!((agg.down_cur, agg.up_cur), (500, 200));
        assert_eq!(ledger.cycle_pids().len(), 1);
    }

    #[test]
    fn test_bad_line_does_not_affect_others() {
        let mut ledger = ProcessByteLedger::new();
        ledger.begin_cycle();
        let lines = [
            "t Safari.10 300 100",
            "t broken.12 abc 100",
            "t curl.11 50 70",
        ];
        let failures = lines
            .iter()
            .filter(|l| ledger.apply_line(l).is_err())
            .count();
        assert_eq!(failures, 1);
        assert_eq!(ledger.len(), 2);
        assert!(ledger.get(12).is_none());
        assert_eq!(ledger.aggregate().up_cur, 170);
        assert_eq!(ledger.aggregate().down_cur, 350);
    }

    #[test]
    fn test_snapshot_sorted_by_combined_delta() {
        let mut ledger = ProcessByteLedger::new();
        ledger.begin_cycle();
        ledger.apply_line("t a.1 100 100").unwrap();
        ledger.apply_line("t b.2 100 100").unwrap();
        ledger.apply_line("t c.3 100 100").unwrap();
        ledger.begin_cycle();
        ledger.apply_line("t a.1 150 100").unwrap();
        ledger.apply_line("t b.2 900 900").unwrap();
        ledger.apply_line("t c.3 100 400").unwrap();

        let snap = ledger.snapshot();
        let order: Vec<Pid> = snap.records().iter().map(|r| r.pid).collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert_eq!(snap.top(2).len(), 2);
        assert_eq!(snap.top(10).len(), 3);
    }

    #[test]
    fn test_counter_reset_clamps() {
        let mut ledger = ProcessByteLedger::new();
        ledger.begin_cycle();
        ledger.apply_line("t a.1 1000 1000").unwrap();
        ledger.begin_cycle();
        ledger.apply_line("t a.1 10 10").unwrap();
        assert_eq!(ledger.get(1).unwrap().combined_delta(), 0);
    }
}
