//! Prometheus metrics definitions for netrate.

use netrate::{MonitorStatus, TopEntry};
use prometheus::{Gauge, GaugeVec, Opts, Registry};

/// Collection of Prometheus gauges mirroring the monitor's state.
#[derive(Clone)]
pub struct RateMetrics {
    pub upload: Gauge,
    pub download: Gauge,
    pub tracked_processes: Gauge,
    pub cycles: Gauge,
    pub restarts: Gauge,
    pub failed_invocations: Gauge,
    pub running: Gauge,

    // Top-N per-process rates
    pub top_upload: GaugeVec,
    pub top_download: GaugeVec,
}

impl RateMetrics {
    /// Creates and registers all Prometheus metrics with the registry.
    pub fn new(registry: &Registry) -> Result<Self, Box<dyn std::error::Error>> {
        let upload = Gauge::new(
            "netrate_upload_bytes_per_second",
            "Aggregate upload rate over the last completed cycle",
        )?;
        let download = Gauge::new(
            "netrate_download_bytes_per_second",
            "Aggregate download rate over the last completed cycle",
        )?;
        let tracked_processes = Gauge::new(
            "netrate_tracked_processes",
            "Processes in the last published snapshot",
        )?;
        let cycles = Gauge::new(
            "netrate_sampling_cycles_total",
            "Completed sampling cycles",
        )?;
        let restarts = Gauge::new(
            "netrate_session_restarts_total",
            "Sampling sessions restarted after a desync",
        )?;
        let failed_invocations = Gauge::new(
            "netrate_failed_invocations_total",
            "Accounting command invocations that failed",
        )?;
        let running = Gauge::new("netrate_running", "1 while the monitor is sampling")?;

        let labels = &["rank", "pid", "identifier"];
        let top_upload = GaugeVec::new(
            Opts::new(
                "netrate_top_upload_bytes_per_second",
                "Upload rate of the top-N processes",
            ),
            labels,
        )?;
        let top_download = GaugeVec::new(
            Opts::new(
                "netrate_top_download_bytes_per_second",
                "Download rate of the top-N processes",
            ),
            labels,
        )?;

        registry.register(Box::new(upload.clone()))?;
        registry.register(Box::new(download.clone()))?;
        registry.register(Box::new(tracked_processes.clone()))?;
        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(restarts.clone()))?;
        registry.register(Box::new(failed_invocations.clone()))?;
        registry.register(Box::new(running.clone()))?;
        registry.register(Box::new(top_upload.clone()))?;
        registry.register(Box::new(top_download.clone()))?;

        Ok(Self {
            upload,
            download,
            tracked_processes,
            cycles,
            restarts,
            failed_invocations,
            running,
            top_upload,
            top_download,
        })
    }

    /// Overwrites every gauge with the given state.
    pub fn update(&self, status: &MonitorStatus, top: &[TopEntry]) {
        self.upload.set(status.up_bytes_per_sec);
        self.download.set(status.down_bytes_per_sec);
        self.tracked_processes.set(status.tracked_processes as f64);
        self.cycles.set(status.completed_cycles as f64);
        self.restarts.set(status.restarts as f64);
        self.failed_invocations.set(status.failed_invocations as f64);
        self.running.set(if status.running { 1.0 } else { 0.0 });

        // pids come and go; stale label sets must not linger
        self.top_upload.reset();
        self.top_download.reset();
        for (rank, entry) in top.iter().enumerate() {
            let rank = (rank + 1).to_string();
            let pid = entry.pid.to_string();
            let labels = &[rank.as_str(), pid.as_str(), entry.identifier.as_str()];
            self.top_upload
                .with_label_values(labels)
                .set(entry.up_bytes_per_sec);
            self.top_download
                .with_label_values(labels)
                .set(entry.down_bytes_per_sec);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_replaces_top_series() {
        let registry = Registry::new();
        let metrics = RateMetrics::new(&registry).unwrap();
        let entry = |pid, identifier: &str, up| TopEntry {
            pid,
            identifier: identifier.to_string(),
            up_rate_text: String::new(),
            down_rate_text: String::new(),
            up_bytes_per_sec: up,
            down_bytes_per_sec: 0.0,
        };
        let status = MonitorStatus {
            running: true,
            up_bytes_per_sec: 2048.0,
            ..MonitorStatus::default()
        };

        metrics.update(&status, &[entry(7, "/usr/bin/curl", 10.0), entry(9, "Safari.app", 5.0)]);
        metrics.update(&status, &[entry(9, "Safari.app", 50.0)]);

        assert_eq!(metrics.upload.get(), 2048.0);
        assert_eq!(metrics.running.get(), 1.0);
        let families = registry.gather();
        let top = families
            .iter()
            .find(|f| f.get_name() == "netrate_top_upload_bytes_per_second")
            .unwrap();
        assert_eq!(top.get_metric().len(), 1);
        assert_eq!(
            metrics
                .top_upload
                .with_label_values(&["1", "9", "Safari.app"])
                .get(),
            50.0
        );
    }
}
