//! Synthetic traffic fixtures.
//!
//! A fixture describes a handful of processes with running byte totals per
//! sample and a command path. It can stand in for both external commands:
//! [`TestData::render_accounting`] produces fixed-width accounting output
//! and [`TestData::render_listing`] produces process-listing output.

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::ledger::Pid;

/// Width of a `HH:MM:SS.ffffff` timestamp.
const TIME_WIDTH: usize = 15;

/// Running totals reported for one process in one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficTotals {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Test process entry for JSON serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestProcess {
    pub pid: Pid,
    pub name: String,
    /// Full command line as the listing command would print it.
    pub command: String,
    /// Index of the first sample this process appears in.
    #[serde(default)]
    pub first_sample: usize,
    pub totals: Vec<TrafficTotals>,
}

impl TestProcess {
    fn totals_at(&self, sample: usize) -> Option<TrafficTotals> {
        sample
            .checked_sub(self.first_sample)
            .and_then(|i| self.totals.get(i).copied())
    }
}

/// Root structure for test data JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestData {
    pub version: String,
    pub generated_at: String,
    pub processes: Vec<TestProcess>,
}

impl TestData {
    /// Number of distinct samples before the replay wraps around.
    pub fn sample_count(&self) -> usize {
        self.processes
            .iter()
            .map(|p| p.first_sample + p.totals.len())
            .max()
            .unwrap_or(0)
    }

    /// Renders one sample as accounting output: a header followed by one
    /// line per live process, all of identical width.
    pub fn render_accounting(&self, sample: usize) -> String {
        let rows: Vec<(String, TrafficTotals)> = self
            .processes
            .iter()
            .filter_map(|p| {
                p.totals_at(sample)
                    .map(|t| (format!("{}.{}", p.name, p.pid), t))
            })
            .collect();

        let label_w = rows.iter().map(|(l, _)| l.chars().count()).max().unwrap_or(0);
        let in_w = rows
            .iter()
            .map(|(_, t)| t.bytes_in.to_string().len())
            .max()
            .unwrap_or(0)
            .max("bytes_in".len());
        let out_w = rows
            .iter()
            .map(|(_, t)| t.bytes_out.to_string().len())
            .max()
            .unwrap_or(0)
            .max("bytes_out".len());

        let time_w = TIME_WIDTH;
        let mut out = format!(
            "{:<time_w$} {:<label_w$} {:>in_w$} {:>out_w$}\n",
            "time", "", "bytes_in", "bytes_out"
        );
        let now = Local::now().format("%H:%M:%S%.6f").to_string();
        for (label, t) in rows {
            out.push_str(&format!(
                "{:<time_w$} {:<label_w$} {:>in_w$} {:>out_w$}\n",
                now, label, t.bytes_in, t.bytes_out
            ));
        }
        out
    }

    /// Renders `ps -o pid,command` style output for the requested pids.
    /// Unknown pids are left out, as the real listing would.
    pub fn render_listing(&self, pids: &[Pid]) -> String {
        let matched: Vec<&TestProcess> = pids
            .iter()
            .filter_map(|pid| self.processes.iter().find(|p| p.pid == *pid))
            .collect();
        let pid_w = matched
            .iter()
            .map(|p| p.pid.to_string().len())
            .max()
            .unwrap_or(0)
            .max(5);

        let mut out = format!("{:>pid_w$} COMMAND\n", "PID");
        for p in matched {
            out.push_str(&format!("{:>pid_w$} {}\n", p.pid, p.command));
        }
        out
    }
}

/// Splits `text` into randomly sized chunks to mimic a pipe delivering
/// partial reads.
pub fn random_chunks(text: &str, rng: &mut impl Rng, max_chunk: usize) -> Vec<Vec<u8>> {
    let bytes = text.as_bytes();
    let max_chunk = max_chunk.max(1);
    let mut chunks = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let len = rng.gen_range(1..=max_chunk).min(bytes.len() - pos);
        chunks.push(bytes[pos..pos + len].to_vec());
        pos += len;
    }
    chunks
}

/// Load test data from JSON file.
pub fn load_test_data_from_file(path: &Path) -> Result<TestData> {
    debug!("Loading test data from: {}", path.display());

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read test data file {}", path.display()))?;
    let test_data: TestData = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse test data JSON {}", path.display()))?;

    info!(
        "Loaded test data version {} from {} ({} processes, {} samples)",
        test_data.version,
        test_data.generated_at,
        test_data.processes.len(),
        test_data.sample_count()
    );

    Ok(test_data)
}

const SAMPLE_PROCESSES: &[(&str, &str)] = &[
    ("Safari", "/Applications/Safari.app/Contents/MacOS/Safari"),
    (
        "Google Chrome He",
        "/Applications/Google Chrome.app/Contents/Frameworks/Google Chrome Framework.framework/Helpers/Google Chrome Helper.app/Contents/MacOS/Google Chrome Helper --type=utility",
    ),
    ("Dropbox", "/Applications/Dropbox.app/Contents/MacOS/Dropbox"),
    ("curl", "/usr/bin/curl -sO https://example.com/archive.tar.gz"),
    ("mDNSResponder", "/usr/sbin/mDNSResponder"),
    ("rsync", "/usr/bin/rsync -av ./src backup:/srv/src"),
    ("node", "/usr/local/bin/node server.js --port 8080"),
    ("sshd", "/usr/sbin/sshd -i"),
];

/// Generates a fixture with `process_count` processes over `sample_count`
/// samples. Totals only grow; every fifth process exits halfway through.
pub fn generate_test_data(
    rng: &mut impl Rng,
    process_count: usize,
    sample_count: usize,
) -> TestData {
    let mut processes = Vec::with_capacity(process_count);
    let mut pid: Pid = 400;

    for i in 0..process_count {
        let (name, command) = SAMPLE_PROCESSES[i % SAMPLE_PROCESSES.len()];
        let lifetime = if i % 5 == 4 {
            (sample_count / 2).max(1)
        } else {
            sample_count
        };

        // a few heavy talkers, the rest mostly idle
        let peak: u64 = if i % 3 == 0 { 4 * 1024 * 1024 } else { 16 * 1024 };
        let mut totals = Vec::with_capacity(lifetime);
        let mut current = TrafficTotals {
            bytes_in: rng.gen_range(0..1024 * 1024),
            bytes_out: rng.gen_range(0..256 * 1024),
        };
        for _ in 0..lifetime {
            current.bytes_in += rng.gen_range(0..peak);
            current.bytes_out += rng.gen_range(0..peak / 4);
            totals.push(current);
        }

        processes.push(TestProcess {
            pid,
            name: name.to_string(),
            command: command.to_string(),
            first_sample: 0,
            totals,
        });
        pid += rng.gen_range(1..200);
    }

    TestData {
        version: "1.0".to_string(),
        generated_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        processes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reassembler::{Line, StreamReassembler};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fixture() -> TestData {
        TestData {
            version: "1.0".into(),
            generated_at: "2026-01-01T00:00:00Z".into(),
            processes: vec![
                TestProcess {
                    pid: 101,
                    name: "Safari".into(),
                    command: "/Applications/Safari.app/Contents/MacOS/Safari".into(),
                    first_sample: 0,
                    totals: vec![
                        TrafficTotals { bytes_in: 1000, bytes_out: 10 },
                        TrafficTotals { bytes_in: 5000, bytes_out: 20 },
                    ],
                },
                TestProcess {
                    pid: 20222,
                    name: "curl".into(),
                    command: "/usr/bin/curl -s https://example.com".into(),
                    first_sample: 1,
                    totals: vec![TrafficTotals { bytes_in: 123456789, bytes_out: 1 }],
                },
            ],
        }
    }

    #[test]
    fn test_sample_count() {
        assert_eq!(fixture().sample_count(), 2);
    }

    #[test]
    fn test_accounting_lines_share_header_width() {
        let text = fixture().render_accounting(1);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("time"));
        assert!(lines[0].ends_with("bytes_out"));
        let width = lines[0].chars().count();
        assert!(lines.iter().all(|l| l.chars().count() == width));
    }

    #[test]
    fn test_process_absent_before_first_sample() {
        let text = fixture().render_accounting(0);
        assert!(!text.contains("curl"));
        assert!(text.contains("Safari.101"));
    }

    #[test]
    fn test_rendered_output_survives_random_chunking() {
        let text = fixture().render_accounting(1);
        let mut rng = StdRng::seed_from_u64(7);
        let mut r = StreamReassembler::new("time", "bytes_out");
        let mut data = 0;
        for chunk in random_chunks(&text, &mut rng, 9) {
            data += r
                .feed(&chunk)
                .unwrap()
                .iter()
                .filter(|l| matches!(l, Line::Data(_)))
                .count();
        }
        assert_eq!(data, 2);
    }

    #[test]
    fn test_listing_omits_unknown_pids() {
        let text = fixture().render_listing(&[20222, 9, 101]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "  PID COMMAND");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("20222 /usr/bin/curl"));
        assert!(lines[2].starts_with("  101 /Applications/Safari.app"));
    }

    #[test]
    fn test_generated_totals_are_monotonic() {
        let mut rng = StdRng::seed_from_u64(42);
        let data = generate_test_data(&mut rng, 10, 6);
        assert_eq!(data.processes.len(), 10);
        assert_eq!(data.sample_count(), 6);
        for p in &data.processes {
            for pair in p.totals.windows(2) {
                assert!(pair[1].bytes_in >= pair[0].bytes_in);
                assert!(pair[1].bytes_out >= pair[0].bytes_out);
            }
        }
        assert_eq!(data.processes[4].totals.len(), 3);
    }

    #[test]
    fn test_json_round_trip_through_file() {
        let data = fixture();
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), serde_json::to_string_pretty(&data).unwrap()).unwrap();
        let loaded = load_test_data_from_file(file.path()).unwrap();
        assert_eq!(loaded.processes.len(), 2);
        assert_eq!(loaded.processes[1].first_sample, 1);
    }
}
