//! Configuration management for netrate.
//!
//! The configuration is loaded from YAML (default), JSON or TOML and merged
//! with CLI overrides by the front-end. All keys are optional; accessors
//! fall back to the defaults below.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9216;
pub const DEFAULT_INTERVAL_MS: u32 = 1600;
pub const DEFAULT_CHURN_THRESHOLD: usize = 3;
pub const DEFAULT_TOP_N: usize = 4;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_ACCOUNTING_PROGRAM: &str = "/usr/bin/nettop";
pub const DEFAULT_LISTING_PROGRAM: &str = "/bin/ps";
pub const DEFAULT_HEADER_PREFIX: &str = "time";
pub const DEFAULT_TERMINAL_TOKEN: &str = "bytes_out";
pub const DEFAULT_PATH_COLUMN: &str = "COMMAND";

/// WiFi and wired interfaces only, per-process summary, raw byte counts,
/// one sample, and only the columns the ledger reads.
pub const DEFAULT_ACCOUNTING_ARGS: &[&str] = &[
    "-x",
    "-P",
    "-l",
    "1",
    "-t",
    "wifi",
    "-t",
    "wired",
    "-J",
    "time,bytes_in,bytes_out",
];

/// Locations tried in order when no config path is given.
pub const DEFAULT_CONFIG_LOCATIONS: &[&str] = &[
    "/etc/netrate/netrate.yaml",
    "/etc/netrate/netrate.yml",
    "/etc/netrate/netrate.json",
    "./netrate.yaml",
    "./netrate.yml",
    "./netrate.json",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    // Sampling
    #[serde(alias = "interval-ms")]
    pub interval_ms: Option<u32>,
    /// New pids per cycle tolerated before the session is restarted.
    #[serde(alias = "churn-threshold")]
    pub churn_threshold: Option<usize>,
    #[serde(alias = "top-n")]
    pub top_n: Option<usize>,
    #[serde(alias = "command-timeout-ms")]
    pub command_timeout_ms: Option<u64>,

    // External commands
    pub accounting_program: Option<String>,
    pub accounting_args: Option<Vec<String>>,
    pub header_prefix: Option<String>,
    pub header_terminal_token: Option<String>,
    pub listing_program: Option<String>,
    pub listing_path_column: Option<String>,

    // Replay instead of external commands
    pub test_data_file: Option<PathBuf>,

    // Server configuration
    pub enable_http: Option<bool>,
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub enable_health: Option<bool>,

    // Logging
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_ms: Some(DEFAULT_INTERVAL_MS),
            churn_threshold: Some(DEFAULT_CHURN_THRESHOLD),
            top_n: Some(DEFAULT_TOP_N),
            command_timeout_ms: Some(DEFAULT_COMMAND_TIMEOUT_MS),
            accounting_program: Some(DEFAULT_ACCOUNTING_PROGRAM.into()),
            accounting_args: Some(DEFAULT_ACCOUNTING_ARGS.iter().map(|s| s.to_string()).collect()),
            header_prefix: Some(DEFAULT_HEADER_PREFIX.into()),
            header_terminal_token: Some(DEFAULT_TERMINAL_TOKEN.into()),
            listing_program: Some(DEFAULT_LISTING_PROGRAM.into()),
            listing_path_column: Some(DEFAULT_PATH_COLUMN.into()),
            test_data_file: None,
            enable_http: Some(false),
            bind: Some(DEFAULT_BIND_ADDR.into()),
            port: Some(DEFAULT_PORT),
            enable_health: Some(true),
            log_level: Some("info".into()),
        }
    }
}

impl Config {
    pub fn interval_ms(&self) -> u32 {
        self.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.interval_ms()))
    }

    pub fn churn_threshold(&self) -> usize {
        self.churn_threshold.unwrap_or(DEFAULT_CHURN_THRESHOLD)
    }

    pub fn top_n(&self) -> usize {
        self.top_n.unwrap_or(DEFAULT_TOP_N)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.unwrap_or(DEFAULT_COMMAND_TIMEOUT_MS))
    }

    pub fn accounting_program(&self) -> &str {
        self.accounting_program
            .as_deref()
            .unwrap_or(DEFAULT_ACCOUNTING_PROGRAM)
    }

    pub fn accounting_args(&self) -> Vec<String> {
        match &self.accounting_args {
            Some(args) => args.clone(),
            None => DEFAULT_ACCOUNTING_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn header_prefix(&self) -> &str {
        self.header_prefix.as_deref().unwrap_or(DEFAULT_HEADER_PREFIX)
    }

    pub fn header_terminal_token(&self) -> &str {
        self.header_terminal_token
            .as_deref()
            .unwrap_or(DEFAULT_TERMINAL_TOKEN)
    }

    pub fn listing_program(&self) -> &str {
        self.listing_program.as_deref().unwrap_or(DEFAULT_LISTING_PROGRAM)
    }

    pub fn listing_path_column(&self) -> &str {
        self.listing_path_column
            .as_deref()
            .unwrap_or(DEFAULT_PATH_COLUMN)
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<()> {
    if cfg.interval_ms() == 0 {
        bail!("interval_ms must be greater than 0");
    }
    if cfg.top_n() == 0 {
        bail!("top_n must be greater than 0");
    }
    if cfg.command_timeout().is_zero() {
        bail!("command_timeout_ms must be greater than 0");
    }
    if cfg.test_data_file.is_none() {
        if cfg.accounting_program().trim().is_empty() {
            bail!("accounting_program must not be empty");
        }
        if cfg.listing_program().trim().is_empty() {
            bail!("listing_program must not be empty");
        }
    }
    if cfg.header_prefix().trim().is_empty() || cfg.header_terminal_token().trim().is_empty() {
        bail!("header_prefix and header_terminal_token must not be empty");
    }
    if cfg.listing_path_column().trim().is_empty() {
        bail!("listing_path_column must not be empty");
    }
    if let Some(bind) = cfg.bind.as_deref() {
        bind.parse::<std::net::IpAddr>()
            .with_context(|| format!("Invalid bind address '{bind}'"))?;
    }
    Ok(())
}

/// Loads configuration from `path`, or from the first existing default
/// location. Missing files yield the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match DEFAULT_CONFIG_LOCATIONS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
        {
            Some(p) => p.to_path_buf(),
            None => return Ok(Config::default()),
        },
    };

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = parse_config(&content, &path)?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

fn parse_config(content: &str, path: &Path) -> Result<Config> {
    let config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?,
        Some("toml") => toml::from_str(content)
            .with_context(|| format!("Invalid TOML in {}", path.display()))?,
        _ => serde_yaml::from_str(content)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?,
    };
    Ok(config)
}
