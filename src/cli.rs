//! CLI arguments and subcommands for netrate.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "netrate",
    about = "Per-process network throughput monitor",
    long_about = "Per-process network throughput monitor.\n\n\
                  Samples an external traffic-accounting command on a fixed interval, \
                  reports aggregate upload/download rates and ranks the busiest processes. \
                  Optionally serves the figures as Prometheus metrics.",
    version = "0.1.0",
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Sampling interval in milliseconds
    #[arg(short = 'i', long)]
    pub interval_ms: Option<u32>,

    /// New pids per cycle tolerated before the session restarts
    #[arg(long)]
    pub churn_threshold: Option<usize>,

    /// Number of processes in the ranked list
    #[arg(short = 'n', long)]
    pub top_n: Option<usize>,

    /// Print the ranked list every N rate updates (0 = never)
    #[arg(long, default_value_t = 5)]
    pub top_every: u64,

    /// Serve /metrics and /health over HTTP
    #[arg(long)]
    pub http: bool,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,

    /// Path to JSON test data file (replays it instead of running commands)
    #[arg(short = 't', long)]
    pub test_data_file: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and external commands
    Check,

    /// Generate configuration files
    Config {
        /// Output file path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Sample briefly and print the busiest processes
    Top {
        /// Number of processes to show (defaults to top_n)
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Output format (plain table when omitted)
        #[arg(long, value_enum)]
        format: Option<ConfigFormat>,
    },

    /// Generate synthetic traffic fixture JSON file
    GenerateTestdata {
        /// Output file path
        #[arg(short = 'o', long, default_value = "testdata.json")]
        output: PathBuf,

        /// Number of processes
        #[arg(long, default_value_t = 12)]
        processes: usize,

        /// Number of samples per process
        #[arg(long, default_value_t = 30)]
        samples: usize,
    },
}
