//! Public lifecycle handle for the sampling engine.
//!
//! A front-end creates one [`NetMonitor`], registers a [`RateListener`] and
//! calls [`NetMonitor::start`] / [`NetMonitor::stop`]. Failures inside the
//! engine never cross this boundary; they show up as zero or sentinel rates.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::health::HealthStats;
use crate::ledger::LedgerSnapshot;
use crate::resolver::{TopEntry, TopNResolver};
use crate::sampler::{run_sampler, SessionSettings, Shared};
use crate::source::Source;

/// Receives the aggregate rate once per completed cycle, and
/// [`NO_DATA`](crate::format::NO_DATA) for both directions on stop.
pub trait RateListener: Send + Sync + 'static {
    fn on_rate_update(&self, up: &str, down: &str);
}

impl<F> RateListener for F
where
    F: Fn(&str, &str) + Send + Sync + 'static,
{
    fn on_rate_update(&self, up: &str, down: &str) {
        self(up, down)
    }
}

/// Point-in-time view of the monitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub up_text: Option<String>,
    pub down_text: Option<String>,
    pub up_bytes_per_sec: f64,
    pub down_bytes_per_sec: f64,
    pub tracked_processes: usize,
    pub completed_cycles: u64,
    pub restarts: u64,
    pub failed_invocations: u64,
}

pub struct NetMonitor {
    shared: Arc<Shared>,
    resolver: TopNResolver,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NetMonitor {
    pub fn new<L: RateListener>(cfg: &Config, source: Source, listener: L) -> Self {
        let settings = SessionSettings::from_config(cfg);
        let resolver = TopNResolver::new(
            source.clone(),
            settings.interval_millis,
            cfg.listing_path_column(),
        );
        let shared = Arc::new(Shared {
            source,
            settings,
            listener: Arc::new(listener),
            snapshot: RwLock::new(LedgerSnapshot::default()),
            latest: RwLock::new(None),
            health: Arc::new(HealthStats::new()),
        });
        Self {
            shared,
            resolver,
            task: Mutex::new(None),
        }
    }

    /// Starts sampling. A no-op while already running.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("monitor already running");
            return;
        }
        *task = Some(tokio::spawn(run_sampler(self.shared.clone())));
        info!(
            "Network rate monitor started ({}ms interval, {})",
            self.shared.settings.interval_millis,
            self.shared.source.describe()
        );
    }

    /// Stops sampling and discards all counters.
    ///
    /// The sampling task is aborted and awaited, so any in-flight command has
    /// been killed when this returns. The listener then receives the no-data
    /// sentinel. A no-op while stopped.
    pub async fn stop(&self) {
        let Some(handle) = self.task.lock().await.take() else {
            return;
        };
        handle.abort();
        let _ = handle.await;
        self.shared.deliver_sentinel().await;
        info!("Network rate monitor stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Top `n` processes of the last completed cycle. Empty while stopped.
    pub async fn top_entries(&self, n: usize) -> Vec<TopEntry> {
        if !self.is_running().await {
            return Vec::new();
        }
        let snapshot = self.shared.snapshot.read().await.clone();
        self.resolver.resolve(&snapshot, n).await
    }

    pub async fn status(&self) -> MonitorStatus {
        let running = self.is_running().await;
        let latest = self.shared.latest.read().await.clone();
        let tracked_processes = self.shared.snapshot.read().await.len();
        let health = &self.shared.health;
        MonitorStatus {
            running,
            up_bytes_per_sec: latest.as_ref().map_or(0.0, |r| r.up_bytes_per_sec),
            down_bytes_per_sec: latest.as_ref().map_or(0.0, |r| r.down_bytes_per_sec),
            up_text: latest.as_ref().map(|r| r.up_text.clone()),
            down_text: latest.map(|r| r.down_text),
            tracked_processes,
            completed_cycles: health.total_cycles(),
            restarts: health.restarts(),
            failed_invocations: health.failed_invocations(),
        }
    }

    pub fn health(&self) -> Arc<HealthStats> {
        self.shared.health.clone()
    }
}

impl Drop for NetMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::NO_DATA;
    use crate::source::ReplaySource;
    use crate::testdata::{TestData, TestProcess, TrafficTotals};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    type Updates = Arc<StdMutex<Vec<(String, String)>>>;

    fn replay(samples: u64) -> Source {
        let totals = (0..samples)
            .map(|i| TrafficTotals {
                bytes_in: 1000 + i * 2048,
                bytes_out: 500 + i * 1024,
            })
            .collect();
        Source::Replay(ReplaySource::new(TestData {
            version: "1.0".into(),
            generated_at: "now".into(),
            processes: vec![TestProcess {
                pid: 42,
                name: "curl".into(),
                command: "/usr/bin/curl -s".into(),
                first_sample: 0,
                totals,
            }],
        }))
    }

    fn monitor(source: Source) -> (NetMonitor, Updates) {
        let updates: Updates = Arc::new(StdMutex::new(Vec::new()));
        let sink = updates.clone();
        let cfg = Config {
            interval_ms: Some(20),
            ..Config::default()
        };
        let monitor = NetMonitor::new(&cfg, source, move |up: &str, down: &str| {
            sink.lock().unwrap().push((up.to_string(), down.to_string()));
        });
        (monitor, updates)
    }

    #[tokio::test]
    async fn test_stopped_monitor_is_inert() {
        let (monitor, updates) = monitor(replay(4));
        assert!(monitor.top_entries(4).await.is_empty());
        monitor.stop().await;
        assert!(updates.lock().unwrap().is_empty());
        assert!(!monitor.status().await.running);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_delivers_sentinel() {
        let (monitor, updates) = monitor(replay(1000));
        monitor.start().await;
        monitor.start().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(monitor.is_running().await);

        monitor.stop().await;
        assert!(!monitor.is_running().await);
        let updates = updates.lock().unwrap().clone();
        assert!(updates.len() >= 2);
        assert_eq!(
            updates.last().cloned(),
            Some((NO_DATA.to_string(), NO_DATA.to_string()))
        );
        assert!(updates[..updates.len() - 1]
            .iter()
            .all(|(up, down)| up != NO_DATA && down != NO_DATA));
        assert!(monitor.top_entries(4).await.is_empty());
        assert_eq!(monitor.status().await.up_text, None);
    }

    #[tokio::test]
    async fn test_failing_source_never_panics() {
        let cfg = Config {
            interval_ms: Some(10),
            accounting_program: Some("/nonexistent/netrate-accounting".into()),
            ..Config::default()
        };
        let source = Source::from_config(&cfg).unwrap();
        let monitor = NetMonitor::new(&cfg, source, |_: &str, _: &str| {});
        monitor.start().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let status = monitor.status().await;
        assert!(status.running);
        assert!(status.failed_invocations >= 1);
        assert_eq!(status.completed_cycles, 0);
        monitor.stop().await;
    }
}
