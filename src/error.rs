//! Error types for the sampling engine.
//!
//! None of these cross the public lifecycle boundary of
//! [`NetMonitor`](crate::monitor::NetMonitor); the sampler logs them and
//! turns them into recovery actions (drop a line, restart the session, or
//! treat the cycle as idle).

use std::io;
use std::process::ExitStatus;
use thiserror::Error;

/// Framing failure while reconstructing lines from the accounting stream.
///
/// Any variant means the stream can no longer be trusted and the session
/// must be restarted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// A non-trailing data line did not match the width of the last header.
    #[error("line width {actual} does not match header width {expected}: {line:?}")]
    Desync {
        line: String,
        expected: usize,
        actual: usize,
    },

    /// A header candidate did not end with the terminal column name.
    #[error("malformed header line: {line:?}")]
    MalformedHeader { line: String },

    /// A data line arrived before any header established the line width.
    #[error("data line before any header: {line:?}")]
    MissingHeader { line: String },

    /// Output ended in the middle of a line.
    #[error("output ended with an incomplete line ({len} chars pending)")]
    Truncated { len: usize },
}

/// Failure to parse one data line into a typed row.
///
/// Recoverable per line: the offending line is dropped and the rest of the
/// batch is still applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineParseError {
    #[error("expected at least 3 columns, got {0}")]
    TooFewTokens(usize),

    #[error("invalid {field} value {value:?}")]
    InvalidBytes { field: &'static str, value: String },

    #[error("process label {0:?} has no '.<pid>' suffix")]
    MissingPidSeparator(String),

    #[error("invalid pid {0:?}")]
    InvalidPid(String),
}

/// Failure to obtain output from an external command (or its replay).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error reading from '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program}' did not finish within {millis}ms")]
    Timeout { program: String, millis: u64 },

    #[error("'{program}' exited with {status}")]
    Exited { program: String, status: ExitStatus },

    #[error("replay source: {0}")]
    Replay(String),
}

/// Result type alias for external command invocations.
pub type SourceResult<T> = std::result::Result<T, SourceError>;
