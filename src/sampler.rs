//! The sampling engine.
//!
//! A [`Session`] owns every piece of cycle-scoped state: the ledger, the
//! line buffer and the pid history. [`run_sampler`] drives one session per
//! tick and throws it away on desync.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{FrameError, SourceError};
use crate::format::{bytes_per_second, format_rate, NO_DATA};
use crate::health::HealthStats;
use crate::ledger::{LedgerSnapshot, ProcessByteLedger, TrafficRow};
use crate::monitor::RateListener;
use crate::reassembler::{Line, StreamReassembler};
use crate::source::Source;
use crate::stability::StabilityMonitor;

/// Everything a session needs to be rebuilt from scratch.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub header_prefix: String,
    pub terminal_token: String,
    pub churn_threshold: usize,
    pub interval_millis: u32,
}

impl SessionSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            header_prefix: cfg.header_prefix().to_string(),
            terminal_token: cfg.header_terminal_token().to_string(),
            churn_threshold: cfg.churn_threshold(),
            interval_millis: cfg.interval_ms(),
        }
    }
}

/// Aggregate rate for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RateUpdate {
    pub up_text: String,
    pub down_text: String,
    pub up_bytes_per_sec: f64,
    pub down_bytes_per_sec: f64,
}

impl RateUpdate {
    fn zero() -> Self {
        Self {
            up_text: format_rate(0, 0, 1),
            down_text: format_rate(0, 0, 1),
            up_bytes_per_sec: 0.0,
            down_bytes_per_sec: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesyncCause {
    Frame(FrameError),
    Churn { new_pids: usize, threshold: usize },
}

impl std::fmt::Display for DesyncCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DesyncCause::Frame(e) => write!(f, "framing desync: {e}"),
            DesyncCause::Churn {
                new_pids,
                threshold,
            } => write!(f, "pid churn: {new_pids} new pids (threshold {threshold})"),
        }
    }
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// `None` when there was no baseline to diff against.
    pub rates: Option<RateUpdate>,
    pub desync: Option<DesyncCause>,
    pub applied: usize,
    pub dropped: usize,
    pub processes: usize,
    pub snapshot: LedgerSnapshot,
}

#[derive(Debug)]
pub struct Session {
    settings: SessionSettings,
    ledger: ProcessByteLedger,
    reassembler: StreamReassembler,
    stability: StabilityMonitor,
    has_baseline: bool,
}

impl Session {
    pub fn new(settings: SessionSettings) -> Self {
        let reassembler =
            StreamReassembler::new(settings.header_prefix.clone(), settings.terminal_token.clone());
        let stability = StabilityMonitor::new(settings.churn_threshold);
        Self {
            settings,
            ledger: ProcessByteLedger::new(),
            reassembler,
            stability,
            has_baseline: false,
        }
    }

    pub fn ledger(&self) -> &ProcessByteLedger {
        &self.ledger
    }

    pub fn has_baseline(&self) -> bool {
        self.has_baseline
    }

    /// Runs one cycle over the chunks of one accounting invocation.
    ///
    /// A framing desync leaves the ledger untouched. Output without a single
    /// usable process line is an idle cycle. Otherwise the rate is computed
    /// before the pid history is checked, so a churn desync still carries
    /// this cycle's rate.
    pub fn process(&mut self, chunks: &[Vec<u8>]) -> CycleReport {
        let lines = match self.frame(chunks) {
            Ok(lines) => lines,
            Err(e) => {
                return CycleReport {
                    desync: Some(DesyncCause::Frame(e)),
                    ..CycleReport::default()
                }
            }
        };

        let mut dropped = 0;
        let rows: Vec<TrafficRow> = lines
            .iter()
            .filter_map(|l| match l {
                Line::Data(text) => Some(text),
                Line::Header(_) => None,
            })
            .filter_map(|line| match TrafficRow::parse(line) {
                Ok(row) => Some(row),
                Err(e) => {
                    debug!("dropping unparsable line {:?}: {}", line, e);
                    dropped += 1;
                    None
                }
            })
            .collect();

        // Empty or header-only output: rotating the ledger now would diff
        // the next sample against zero.
        if rows.is_empty() {
            debug!(dropped, "no usable process lines, counting as idle cycle");
            return CycleReport {
                rates: self.idle_cycle(),
                dropped,
                ..CycleReport::default()
            };
        }

        self.ledger.begin_cycle();
        for row in &rows {
            self.ledger.apply_row(row);
        }
        let applied = rows.len();

        let interval_millis = self.settings.interval_millis;
        let (rates, snapshot) = if self.has_baseline {
            let agg = self.ledger.aggregate();
            let rates = RateUpdate {
                up_text: format_rate(agg.up_prev, agg.up_cur, interval_millis),
                down_text: format_rate(agg.down_prev, agg.down_cur, interval_millis),
                up_bytes_per_sec: bytes_per_second(agg.up_prev, agg.up_cur, interval_millis),
                down_bytes_per_sec: bytes_per_second(agg.down_prev, agg.down_cur, interval_millis),
            };
            (Some(rates), self.ledger.snapshot())
        } else {
            (None, LedgerSnapshot::default())
        };
        self.has_baseline = true;

        let pids = self.ledger.cycle_pids();
        let new_pids = self.stability.new_pids(pids);
        let desync = self.stability.observe(pids).then(|| DesyncCause::Churn {
            new_pids,
            threshold: self.stability.threshold(),
        });

        CycleReport {
            rates,
            desync,
            applied,
            dropped,
            processes: self.ledger.cycle_pids().len(),
            snapshot,
        }
    }

    /// A cycle where the accounting command produced nothing usable.
    ///
    /// Counts as zero activity. The next good sample only re-establishes the
    /// baseline, since its delta would span more than one interval.
    pub fn idle_cycle(&mut self) -> Option<RateUpdate> {
        self.reassembler.reset();
        std::mem::replace(&mut self.has_baseline, false).then(RateUpdate::zero)
    }

    /// Discards all counters, buffered text and pid history.
    pub fn reset(&mut self) {
        *self = Session::new(self.settings.clone());
    }

    fn frame(&mut self, chunks: &[Vec<u8>]) -> Result<Vec<Line>, FrameError> {
        let framed = frame_chunks(&mut self.reassembler, chunks);
        if framed.is_err() {
            self.reassembler.reset();
        }
        framed
    }
}

fn frame_chunks(
    reassembler: &mut StreamReassembler,
    chunks: &[Vec<u8>],
) -> Result<Vec<Line>, FrameError> {
    let mut lines = Vec::new();
    for chunk in chunks {
        lines.extend(reassembler.feed(chunk)?);
    }
    lines.extend(reassembler.finish()?);
    Ok(lines)
}

/// State shared between the sampling task and the monitor handle.
pub(crate) struct Shared {
    pub source: Source,
    pub settings: SessionSettings,
    pub listener: Arc<dyn RateListener>,
    pub snapshot: RwLock<LedgerSnapshot>,
    pub latest: RwLock<Option<RateUpdate>>,
    pub health: Arc<HealthStats>,
}

impl Shared {
    pub(crate) async fn publish(&self, snapshot: LedgerSnapshot) {
        *self.snapshot.write().await = snapshot;
    }

    pub(crate) async fn deliver(&self, rates: RateUpdate) {
        self.listener.on_rate_update(&rates.up_text, &rates.down_text);
        *self.latest.write().await = Some(rates);
    }

    /// Clears published state and hands the listener the no-data sentinel.
    pub(crate) async fn deliver_sentinel(&self) {
        self.publish(LedgerSnapshot::default()).await;
        *self.latest.write().await = None;
        self.listener.on_rate_update(NO_DATA, NO_DATA);
    }
}

/// Consecutive accounting failures, reported once per streak.
#[derive(Debug, Default)]
struct FailureStreak {
    count: u64,
}

impl FailureStreak {
    fn fail(&mut self, err: &SourceError) {
        self.count += 1;
        if self.count == 1 {
            warn!("accounting command failed, reporting zero activity: {}", err);
        } else {
            debug!(streak = self.count, "accounting command failed again: {}", err);
        }
    }

    fn recover(&mut self) {
        if self.count > 0 {
            info!(
                "accounting command recovered after {} failed invocation(s)",
                self.count
            );
            self.count = 0;
        }
    }
}

/// The periodic sampling task. Runs until aborted.
pub(crate) async fn run_sampler(shared: Arc<Shared>) {
    let period = Duration::from_millis(u64::from(shared.settings.interval_millis));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut session = Session::new(shared.settings.clone());
    let mut streak = FailureStreak::default();

    debug!(
        "Sampling task started with {}ms interval using {}",
        shared.settings.interval_millis,
        shared.source.describe()
    );

    loop {
        ticker.tick().await;
        let started = Instant::now();

        let chunks = match shared.source.sample().await {
            Ok(chunks) => {
                streak.recover();
                chunks
            }
            Err(e) => {
                streak.fail(&e);
                shared.health.record_failure();
                if let Some(rates) = session.idle_cycle() {
                    shared.deliver(rates).await;
                }
                shared.publish(LedgerSnapshot::default()).await;
                continue;
            }
        };

        let report = session.process(&chunks);
        if let Some(rates) = report.rates {
            shared.deliver(rates).await;
        }

        if let Some(cause) = report.desync {
            warn!("restarting sampling session: {}", cause);
            session.reset();
            shared.publish(LedgerSnapshot::default()).await;
            shared.health.record_restart();
            ticker.reset();
            continue;
        }

        shared.publish(report.snapshot).await;
        shared.health.record_cycle(
            report.processes as u64,
            started.elapsed().as_secs_f64(),
            report.dropped as u64,
        );
        debug!(
            applied = report.applied,
            dropped = report.dropped,
            processes = report.processes,
            "cycle complete"
        );
    }
}
