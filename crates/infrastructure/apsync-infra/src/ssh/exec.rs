//! Batch remote execution.
//!
//! The exec channel alone does not give us a way to signal the remote
//! process, so every batch command is wrapped as
//!
//! ```text
//! cd <cwd> && echo AUTOPROJ_SYNC_PID=$$ && exec <argv...>
//! ```
//!
//! making the very first output line a sentinel carrying the remote
//! shell's pid. The parser below strips exactly that line; everything
//! after it, including any later line that merely looks like a
//! sentinel, belongs to the command.

use apsync_core::ExecResult;
use camino::Utf8Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ssh::{Connection, SshConnection, TransportError};

/// Fixed textual form of the sentinel line, shared with compatible
/// remote tooling.
pub const SENTINEL_PREFIX: &str = "AUTOPROJ_SYNC_PID=";

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("remote command cancelled")]
    Cancelled,
}

/// Build the wrapped remote command line for `argv` under `cwd`.
pub fn build_command_line(
    argv: &[String],
    cwd: Option<&Utf8Path>,
) -> Result<String, TransportError> {
    let quote = |s: &str| {
        shlex::try_quote(s)
            .map(|q| q.into_owned())
            .map_err(|_| TransportError::Command(format!("cannot quote {s:?}")))
    };
    let mut quoted = Vec::with_capacity(argv.len());
    for arg in argv {
        quoted.push(quote(arg)?);
    }
    let tail = format!("echo {SENTINEL_PREFIX}$$ && exec {}", quoted.join(" "));
    match cwd {
        Some(dir) => Ok(format!("cd {} && {tail}", quote(dir.as_str())?)),
        None => Ok(tail),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ParserState {
    AwaitingSentinel,
    Streaming,
}

/// Line-oriented two-state parser for the sentinel protocol. Chunks
/// may split the sentinel line anywhere; the parser buffers until the
/// first newline, extracts the pid, and passes every subsequent byte
/// through untouched.
#[derive(Debug)]
pub struct SentinelParser {
    state: ParserState,
    buf: Vec<u8>,
}

impl SentinelParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::AwaitingSentinel,
            buf: Vec::new(),
        }
    }

    /// Feed a chunk; command output is appended to `out`. Returns the
    /// remote pid when this chunk completed the sentinel line.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Option<i64> {
        match self.state {
            ParserState::Streaming => {
                out.extend_from_slice(chunk);
                None
            }
            ParserState::AwaitingSentinel => {
                self.buf.extend_from_slice(chunk);
                let newline = self.buf.iter().position(|&b| b == b'\n')?;
                let line = String::from_utf8_lossy(&self.buf[..newline]).into_owned();
                let rest = self.buf.split_off(newline + 1);
                self.state = ParserState::Streaming;

                let pid = line
                    .trim_end_matches('\r')
                    .strip_prefix(SENTINEL_PREFIX)
                    .and_then(|pid| pid.parse::<i64>().ok());
                if pid.is_none() {
                    // A first line that is not the sentinel is the
                    // wrapper shell failing, typically the `cd`; the
                    // caller needs that diagnostic.
                    warn!("expected sentinel line, got {line:?}");
                    out.append(&mut self.buf);
                }
                self.buf.clear();
                out.extend_from_slice(&rest);
                pid
            }
        }
    }

    /// Flush anything still buffered when the stream closes before the
    /// first newline arrived.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if !self.buf.is_empty() {
            warn!("stream ended inside the sentinel line");
            out.append(&mut self.buf);
        }
    }
}

impl Default for SentinelParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Ad-hoc remote command execution on an established connection, with
/// best-effort cancellation and a terminal-forwarding mode.
pub struct RemoteExec<'c> {
    conn: &'c SshConnection,
}

impl<'c> RemoteExec<'c> {
    pub fn new(conn: &'c SshConnection) -> Self {
        Self { conn }
    }

    /// Run `argv` remotely and wait for its synthesized status.
    ///
    /// When `cancel` fires first, the captured remote pid is killed
    /// over a second exec, and the call still waits for the original
    /// channel to close before reporting [`ExecError::Cancelled`], so
    /// the remote side is never left ambiguous.
    pub async fn run(
        &self,
        argv: &[String],
        cwd: Option<&Utf8Path>,
        cancel: &CancellationToken,
    ) -> Result<ExecResult, ExecError> {
        let (pid_rx, task) = self.conn.exec_with_pid(argv, cwd)?;
        tokio::pin!(task);

        tokio::select! {
            res = &mut task => Ok(res?),
            _ = cancel.cancelled() => {
                if let Ok(pid) = pid_rx.await {
                    debug!("cancellation requested, killing remote pid {pid}");
                    if let Err(err) = self.kill(pid).await {
                        warn!("failed to kill remote pid {pid}: {err}");
                    }
                }
                // Drain the original channel regardless.
                let _ = task.await;
                Err(ExecError::Cancelled)
            }
        }
    }

    /// Run `argv` in full terminal-forwarding mode. Returns only the
    /// raw transport-level exit status.
    pub async fn run_interactive(
        &self,
        argv: &[String],
        cwd: &Utf8Path,
    ) -> Result<i32, ExecError> {
        self.conn.exec_interactive(argv, cwd).await
    }

    /// The exec channel carrying the running command cannot deliver
    /// signals, so the kill travels over a short-lived second session
    /// to the same target.
    async fn kill(&self, pid: i64) -> Result<(), ExecError> {
        let aux = SshConnection::connect(self.conn.target().clone()).await?;
        let argv = vec!["kill".to_string(), pid.to_string()];
        let (_, task) = aux.exec_with_pid(&argv, None)?;
        task.await?;
        Ok(())
    }
}
