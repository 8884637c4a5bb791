//! Ranked top-N list with human-readable process identities.
//!
//! The ledger only knows pids and truncated process names. For the top
//! consumers one listing query maps pids to command paths; application
//! bundles are reported by bundle name, everything else by executable path.

use ahash::AHashMap as HashMap;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::format::{bytes_per_second, format_rate};
use crate::ledger::{ByteCounterRecord, LedgerSnapshot, Pid};
use crate::source::Source;

const BUNDLE_SUFFIX: &str = ".app";

/// One ranked entry. Produced fresh per call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopEntry {
    pub pid: Pid,
    pub identifier: String,
    pub up_rate_text: String,
    pub down_rate_text: String,
    pub up_bytes_per_sec: f64,
    pub down_bytes_per_sec: f64,
}

/// Byte offset of `column` in the listing header.
pub fn locate_path_column(header: &str, column: &str) -> Option<usize> {
    let mut offset = 0;
    for token in header.split(' ') {
        if token == column {
            return Some(offset);
        }
        offset += token.len() + 1;
    }
    None
}

/// Identifier for a command path.
///
/// `/Applications/Google Chrome.app/Contents/MacOS/Google Chrome` yields
/// `Google Chrome.app`; `/usr/bin/curl -s url` yields `/usr/bin/curl`.
pub fn identifier_from_command(command: &str) -> String {
    let command = command.trim();
    if let Some(end) = bundle_end(command) {
        let bundle = &command[..end];
        return bundle.rsplit('/').next().unwrap_or(bundle).to_string();
    }
    command
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// End of the first `.app` path segment the executable path goes through.
///
/// `.app/` counts anywhere before a URL, so bundle names may contain ` - `.
/// A bare trailing `.app` only counts before the first ` -` argument.
fn bundle_end(command: &str) -> Option<usize> {
    let url_start = command.find("//").unwrap_or(command.len());
    let args_start = command.find(" -").unwrap_or(command.len()).min(url_start);

    let mut search = 0;
    while let Some(pos) = command[search..url_start].find(BUNDLE_SUFFIX) {
        let end = search + pos + BUNDLE_SUFFIX.len();
        let is_bundle = match command[end..].chars().next() {
            Some('/') => true,
            Some(c) => c.is_whitespace() && end <= args_start,
            None => end <= args_start,
        };
        if is_bundle {
            return Some(end);
        }
        search = end;
    }
    None
}

/// Maps each listed pid to its identifier.
///
/// Rows are matched by their leading-whitespace-trimmed pid; the command
/// text starts at the header's path column.
pub fn parse_listing(output: &str, column: &str) -> HashMap<Pid, String> {
    let mut identities = HashMap::new();
    let mut lines = output.lines().filter(|l| !l.trim().is_empty());

    let Some(header) = lines.next() else {
        return identities;
    };
    let Some(offset) = locate_path_column(header, column) else {
        warn!("listing header has no {column} column: {header:?}");
        return identities;
    };

    for row in lines {
        let trimmed = row.trim_start();
        let Some(pid_text) = trimmed.split_whitespace().next() else {
            continue;
        };
        let Ok(pid) = pid_text.parse::<Pid>() else {
            debug!("skipping listing row without pid: {row:?}");
            continue;
        };
        let command = row
            .get(offset..)
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| trimmed[pid_text.len()..].trim_start());
        identities.insert(pid, identifier_from_command(command));
    }
    identities
}

/// Builds entries in ranked order, omitting pids without an identity.
pub fn rank_entries(
    selected: &[ByteCounterRecord],
    identities: &HashMap<Pid, String>,
    interval_millis: u32,
) -> Vec<TopEntry> {
    selected
        .iter()
        .filter_map(|rec| {
            let identifier = identities.get(&rec.pid)?;
            Some(TopEntry {
                pid: rec.pid,
                identifier: identifier.clone(),
                up_rate_text: format_rate(rec.up_prev, rec.up_cur, interval_millis),
                down_rate_text: format_rate(rec.down_prev, rec.down_cur, interval_millis),
                up_bytes_per_sec: bytes_per_second(rec.up_prev, rec.up_cur, interval_millis),
                down_bytes_per_sec: bytes_per_second(rec.down_prev, rec.down_cur, interval_millis),
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct TopNResolver {
    source: Source,
    interval_millis: u32,
    path_column: String,
}

impl TopNResolver {
    pub fn new(source: Source, interval_millis: u32, path_column: impl Into<String>) -> Self {
        Self {
            source,
            interval_millis,
            path_column: path_column.into(),
        }
    }

    /// At most `n` entries, highest combined delta first.
    #[instrument(skip(self, snapshot), fields(tracked = snapshot.len()))]
    pub async fn resolve(&self, snapshot: &LedgerSnapshot, n: usize) -> Vec<TopEntry> {
        let selected = snapshot.top(n);
        if selected.is_empty() {
            return Vec::new();
        }
        let pids: Vec<Pid> = selected.iter().map(|r| r.pid).collect();

        let output = match self.source.list(&pids).await {
            Ok(output) => output,
            Err(e) => {
                warn!("process listing failed: {}", e);
                return Vec::new();
            }
        };

        let identities = parse_listing(&output, &self.path_column);
        let entries = rank_entries(selected, &identities, self.interval_millis);
        debug!(
            requested = n,
            resolved = entries.len(),
            "top entries resolved"
        );
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ProcessByteLedger;

    const LISTING: &str = "  PID COMMAND
  101 /Applications/Safari.app/Contents/MacOS/Safari
20222 /usr/bin/curl -s https://example.com
  333 /Applications/Google Chrome.app/Contents/Frameworks/Helper.app/Contents/MacOS/Helper --type=gpu
";

    #[test]
    fn test_locate_path_column() {
        assert_eq!(locate_path_column("  PID COMMAND", "COMMAND"), Some(6));
        assert_eq!(locate_path_column("PID TT COMMAND", "COMMAND"), Some(7));
        assert_eq!(locate_path_column("  PID ARGS", "COMMAND"), None);
    }

    #[test]
    fn test_identifier_bundle() {
        assert_eq!(
            identifier_from_command("/Applications/Safari.app/Contents/MacOS/Safari"),
            "Safari.app"
        );
        assert_eq!(
            identifier_from_command("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            "Google Chrome.app"
        );
        assert_eq!(identifier_from_command("/Applications/Mail.app"), "Mail.app");
        assert_eq!(
            identifier_from_command("/Applications/Foo - Bar.app/Contents/MacOS/Foo"),
            "Foo - Bar.app"
        );
        assert_eq!(
            identifier_from_command("/Applications/Foo - Bar.app/Contents/MacOS/Foo -psn_0_1"),
            "Foo - Bar.app"
        );
    }

    #[test]
    fn test_identifier_plain_path() {
        assert_eq!(
            identifier_from_command("/usr/bin/curl -s https://x.app/y"),
            "/usr/bin/curl"
        );
        assert_eq!(
            identifier_from_command("/usr/local/bin/fetch https://cdn.app/x"),
            "/usr/local/bin/fetch"
        );
        assert_eq!(
            identifier_from_command("/usr/bin/open -a /Applications/Mail.app"),
            "/usr/bin/open"
        );
        assert_eq!(identifier_from_command("/usr/sbin/mDNSResponder"), "/usr/sbin/mDNSResponder");
        assert_eq!(identifier_from_command("/opt/appliance/bin/agent"), "/opt/appliance/bin/agent");
    }

    #[test]
    fn test_parse_listing() {
        let ids = parse_listing(LISTING, "COMMAND");
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[&101], "Safari.app");
        assert_eq!(ids[&20222], "/usr/bin/curl");
        assert_eq!(ids[&333], "Google Chrome.app");
    }

    #[test]
    fn test_parse_listing_without_column() {
        assert!(parse_listing("PID\n1\n", "COMMAND").is_empty());
        assert!(parse_listing("", "COMMAND").is_empty());
    }

    fn ranked_ledger() -> ProcessByteLedger {
        let mut ledger = ProcessByteLedger::new();
        ledger.begin_cycle();
        for line in ["t Safari.101 0 0", "t curl.20222 0 0", "t gone.55 0 0", "t Chrome.333 0 0"] {
            ledger.apply_line(line).unwrap();
        }
        ledger.begin_cycle();
        for line in [
            "t Safari.101 1000 1000",
            "t curl.20222 9000 0",
            "t gone.55 50000 0",
            "t Chrome.333 10 10",
        ] {
            ledger.apply_line(line).unwrap();
        }
        ledger
    }

    #[test]
    fn test_rank_entries_omits_missing_pids() {
        let snapshot = ranked_ledger().snapshot();
        let ids = parse_listing(LISTING, "COMMAND");
        let entries = rank_entries(snapshot.top(3), &ids, 1000);
        // pid 55 ranks first but is not in the listing
        let pids: Vec<Pid> = entries.iter().map(|e| e.pid).collect();
        assert_eq!(pids, vec![20222, 101]);
        assert_eq!(entries[0].identifier, "/usr/bin/curl");
        assert_eq!(entries[0].down_rate_text, "8.79 K/S");
        assert_eq!(entries[0].up_rate_text, "0 B/S");
    }

    #[tokio::test]
    async fn test_resolve_never_exceeds_n() {
        use crate::source::ReplaySource;
        use crate::testdata::{TestData, TestProcess};

        let processes = [(101, "Safari", "/Applications/Safari.app/Contents/MacOS/Safari"),
            (20222, "curl", "/usr/bin/curl"),
            (333, "Chrome", "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome")]
            .into_iter()
            .map(|(pid, name, command)| TestProcess {
                pid,
                name: name.into(),
                command: command.into(),
                first_sample: 0,
                totals: Vec::new(),
            })
            .collect();
        let source = Source::Replay(ReplaySource::new(TestData {
            version: "1.0".into(),
            generated_at: "now".into(),
            processes,
        }));
        let resolver = TopNResolver::new(source, 1000, "COMMAND");
        let snapshot = ranked_ledger().snapshot();

        for n in 0..6 {
            let entries = resolver.resolve(&snapshot, n).await;
            assert!(entries.len() <= n);
            for pair in entries.windows(2) {
                let a = snapshot.records().iter().position(|r| r.pid == pair[0].pid);
                let b = snapshot.records().iter().position(|r| r.pid == pair[1].pid);
                assert!(a < b);
            }
        }
        let all = resolver.resolve(&snapshot, 10).await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].identifier, "Google Chrome.app");

        assert!(resolver
            .resolve(&LedgerSnapshot::default(), 4)
            .await
            .is_empty());
    }
}
