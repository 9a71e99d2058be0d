//! SSH/SFTP transport. One [`SshConnection`] owns one live session and
//! its SFTP subsystem; everything above this layer goes through the
//! [`Connection`] trait so the sync pipeline can be exercised against
//! in-memory fakes.

use apsync_core::{ExecResult, FileFingerprint, RemoteTarget};
use async_trait::async_trait;
use camino::Utf8Path;

pub mod exec;
mod interactive;
mod session;

pub use exec::{ExecError, RemoteExec, SentinelParser, SENTINEL_PREFIX};
pub use session::SshConnection;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connecting to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("authentication failed for {user}@{host}")]
    Auth { user: String, host: String },
    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid remote command: {0}")]
    Command(String),
    #[error("transport task failed: {0}")]
    Join(String),
}

/// Primitives every component of a sync run operates through. `stat`
/// distinguishes a missing path (`Ok(None)`) from a failing probe:
/// callers must never treat a hard stat failure as "not there".
#[async_trait]
pub trait Connection: Send + Sync {
    fn target(&self) -> &RemoteTarget;

    async fn stat(&self, path: &Utf8Path) -> Result<Option<FileFingerprint>, TransportError>;

    async fn mkdir(&self, path: &Utf8Path) -> Result<(), TransportError>;

    async fn upload(&self, bytes: Vec<u8>, remote: &Utf8Path) -> Result<(), TransportError>;

    async fn upload_file(&self, local: &Utf8Path, remote: &Utf8Path)
        -> Result<(), TransportError>;

    async fn download(&self, remote: &Utf8Path) -> Result<Vec<u8>, TransportError>;

    /// Batch remote command run; see [`exec`] for the sentinel
    /// protocol synthesizing the status channel.
    async fn exec(
        &self,
        argv: &[String],
        cwd: Option<&Utf8Path>,
    ) -> Result<ExecResult, TransportError>;
}
