//! Where raw output comes from: the external accounting and listing
//! commands, or a replayed fixture.
//!
//! Commands are spawned with `kill_on_drop`, so dropping an in-flight
//! invocation (timeout, task abort on stop) terminates the child.

use anyhow::Result;
use rand::thread_rng;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::{SourceError, SourceResult};
use crate::ledger::Pid;
use crate::testdata::{load_test_data_from_file, random_chunks, TestData};

const READ_BUF: usize = 8 * 1024;

/// Largest chunk a replay delivers at once.
const REPLAY_MAX_CHUNK: usize = 64;

/// Captured stdout of one finished invocation, as delivered by the pipe.
#[derive(Debug)]
pub struct CommandOutput {
    pub chunks: Vec<Vec<u8>>,
    pub status: ExitStatus,
}

impl CommandOutput {
    pub fn text(&self) -> String {
        let bytes: Vec<u8> = self.chunks.concat();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Runs `program` to completion, collecting stdout chunk by chunk.
#[instrument(skip(args))]
pub async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> SourceResult<CommandOutput> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SourceError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let Some(mut stdout) = child.stdout.take() else {
        return Err(SourceError::Io {
            program: program.to_string(),
            source: io::Error::other("stdout was not captured"),
        });
    };

    let collect = async {
        let mut chunks = Vec::new();
        let mut buf = vec![0u8; READ_BUF];
        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            chunks.push(buf[..n].to_vec());
        }
        let status = child.wait().await?;
        Ok::<_, io::Error>(CommandOutput { chunks, status })
    };

    match tokio::time::timeout(timeout, collect).await {
        Ok(Ok(output)) => {
            debug!(
                chunks = output.chunks.len(),
                status = %output.status,
                "command finished"
            );
            Ok(output)
        }
        Ok(Err(source)) => Err(SourceError::Io {
            program: program.to_string(),
            source,
        }),
        // child is dropped on return and killed
        Err(_) => Err(SourceError::Timeout {
            program: program.to_string(),
            millis: timeout.as_millis() as u64,
        }),
    }
}

/// External commands as configured.
#[derive(Debug, Clone)]
pub struct CommandSource {
    pub accounting_program: String,
    pub accounting_args: Vec<String>,
    pub listing_program: String,
    pub timeout: Duration,
}

impl CommandSource {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            accounting_program: cfg.accounting_program().to_string(),
            accounting_args: cfg.accounting_args(),
            listing_program: cfg.listing_program().to_string(),
            timeout: cfg.command_timeout(),
        }
    }

    pub fn listing_args(pids: &[Pid]) -> Vec<String> {
        let joined = pids
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        vec![
            "-o".to_string(),
            "pid,command".to_string(),
            "-p".to_string(),
            joined,
        ]
    }
}

/// A fixture replayed sample by sample, wrapping around at the end.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    data: Arc<TestData>,
    cursor: Arc<AtomicUsize>,
}

impl ReplaySource {
    pub fn new(data: TestData) -> Self {
        Self {
            data: Arc::new(data),
            cursor: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn data(&self) -> &TestData {
        &self.data
    }

    fn next_sample(&self) -> SourceResult<Vec<Vec<u8>>> {
        let count = self.data.sample_count();
        if count == 0 {
            return Err(SourceError::Replay("fixture has no samples".into()));
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % count;
        let text = self.data.render_accounting(index);
        Ok(random_chunks(&text, &mut thread_rng(), REPLAY_MAX_CHUNK))
    }
}

#[derive(Debug, Clone)]
pub enum Source {
    Command(CommandSource),
    Replay(ReplaySource),
}

impl Source {
    /// Replay when `test_data_file` is set, the real commands otherwise.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        match &cfg.test_data_file {
            Some(path) => Ok(Source::Replay(ReplaySource::new(load_test_data_from_file(
                path,
            )?))),
            None => Ok(Source::Command(CommandSource::from_config(cfg))),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Source::Command(c) => c.accounting_program.clone(),
            Source::Replay(_) => "replay fixture".to_string(),
        }
    }

    /// One accounting sample, as the chunks it was delivered in.
    pub async fn sample(&self) -> SourceResult<Vec<Vec<u8>>> {
        match self {
            Source::Command(c) => {
                let output = run_command(&c.accounting_program, &c.accounting_args, c.timeout).await?;
                if !output.status.success() {
                    return Err(SourceError::Exited {
                        program: c.accounting_program.clone(),
                        status: output.status,
                    });
                }
                Ok(output.chunks)
            }
            Source::Replay(r) => r.next_sample(),
        }
    }

    /// Listing output for `pids`.
    ///
    /// A non-zero exit is not an error here: `ps` fails when some of the
    /// requested pids are gone, and the rows it did print are still valid.
    pub async fn list(&self, pids: &[Pid]) -> SourceResult<String> {
        if pids.is_empty() {
            return Ok(String::new());
        }
        match self {
            Source::Command(c) => {
                let args = CommandSource::listing_args(pids);
                let output = run_command(&c.listing_program, &args, c.timeout).await?;
                if !output.status.success() {
                    debug!(status = %output.status, "listing command exited non-zero");
                }
                Ok(output.text())
            }
            Source::Replay(r) => Ok(r.data.render_listing(pids)),
        }
    }
}
