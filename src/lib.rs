//! Per-process network throughput sampling.
//!
//! The engine runs an external traffic-accounting command on a timer,
//! reassembles its fixed-width output, keeps double-buffered byte counters
//! per process and reports aggregate upload/download rates. On demand it
//! ranks the busiest processes and names them through a process listing.

pub mod config;
pub mod error;
pub mod format;
pub mod health;
pub mod ledger;
pub mod monitor;
pub mod reassembler;
pub mod resolver;
pub mod sampler;
pub mod source;
pub mod stability;
pub mod testdata;

pub use config::Config;
pub use format::{format_rate, NO_DATA};
pub use monitor::{MonitorStatus, NetMonitor, RateListener};
pub use resolver::TopEntry;
pub use source::Source;
