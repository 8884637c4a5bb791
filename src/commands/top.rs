//! Top command implementation.

use anyhow::{bail, Result};
use netrate::{Config, NetMonitor, Source, TopEntry};
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::cli::ConfigFormat;

/// Cycles to wait for a first rate before giving up.
const MAX_WAIT_CYCLES: u32 = 6;

#[derive(Serialize)]
struct TopReport {
    entries: Vec<TopEntry>,
}

/// Samples until one rate has been computed, then prints the ranked list.
pub async fn command_top(config: &Config, count: Option<usize>, format: Option<ConfigFormat>) -> Result<()> {
    let n = count.unwrap_or_else(|| config.top_n());
    let source = Source::from_config(config)?;
    let monitor = NetMonitor::new(config, source, |_: &str, _: &str| {});

    monitor.start().await;
    let deadline = Instant::now() + config.interval() * MAX_WAIT_CYCLES;
    let entries = loop {
        sleep(config.interval()).await;
        let status = monitor.status().await;
        if status.up_text.is_some() {
            break monitor.top_entries(n).await;
        }
        if Instant::now() >= deadline {
            monitor.stop().await;
            bail!(
                "no rate computed after {} cycles ({} failed invocations)",
                MAX_WAIT_CYCLES,
                status.failed_invocations
            );
        }
        debug!("waiting for a baseline");
    };
    monitor.stop().await;

    match format {
        None => print!("{}", render_table(&entries)),
        Some(ConfigFormat::Json) => println!("{}", serde_json::to_string_pretty(&entries)?),
        Some(ConfigFormat::Yaml) => print!("{}", serde_yaml::to_string(&entries)?),
        Some(ConfigFormat::Toml) => print!("{}", toml::to_string_pretty(&TopReport { entries })?),
    }
    Ok(())
}

fn render_table(entries: &[TopEntry]) -> String {
    if entries.is_empty() {
        return "no traffic\n".to_string();
    }
    let id_w = entries
        .iter()
        .map(|e| e.identifier.chars().count())
        .max()
        .unwrap_or(0)
        .max("PROCESS".len());

    let mut out = format!("{:>7}  {:<id_w$}  {:>10}  {:>10}\n", "PID", "PROCESS", "UP", "DOWN");
    for e in entries {
        out.push_str(&format!(
            "{:>7}  {:<id_w$}  {:>10}  {:>10}\n",
            e.pid, e.identifier, e.up_rate_text, e.down_rate_text
        ));
    }
    out
}
