//! Artifact content transfer, delegated to rsync as a subprocess.
//!
//! Directory mirroring is one-directional and destructive: remote
//! files absent locally are deleted after the transfer completes
//! (`--delete-after`), matching the remote tooling's expectations.

use async_trait::async_trait;
use camino::Utf8Path;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("failed to spawn rsync: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("rsync exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
}

/// Seam between the scheduler and the mirroring mechanism, so the
/// scheduler can be tested without a network or an rsync binary.
#[async_trait]
pub trait TransferRunner: Send + Sync {
    /// Mirror `local_dir` onto `dest:remote_dir`, deleting remote
    /// files that are absent locally.
    async fn mirror_dir(
        &self,
        local_dir: &Utf8Path,
        dest: &str,
        remote_dir: &Utf8Path,
    ) -> Result<(), MirrorError>;

    /// Copy one file to `dest:remote_file`.
    async fn copy_file(
        &self,
        local_file: &Utf8Path,
        dest: &str,
        remote_file: &Utf8Path,
    ) -> Result<(), MirrorError>;
}

pub struct RsyncRunner;

pub(crate) fn mirror_dir_args(
    local_dir: &Utf8Path,
    dest: &str,
    remote_dir: &Utf8Path,
) -> Vec<String> {
    vec![
        "-a".to_string(),
        "--delete-after".to_string(),
        format!("{local_dir}/"),
        format!("{dest}:{remote_dir}/"),
    ]
}

pub(crate) fn copy_file_args(
    local_file: &Utf8Path,
    dest: &str,
    remote_file: &Utf8Path,
) -> Vec<String> {
    vec![
        "-a".to_string(),
        local_file.to_string(),
        format!("{dest}:{remote_file}"),
    ]
}

impl RsyncRunner {
    async fn run(&self, args: Vec<String>) -> Result<(), MirrorError> {
        debug!("rsync {}", args.join(" "));
        let output = Command::new("rsync").args(&args).output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(MirrorError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

#[async_trait]
impl TransferRunner for RsyncRunner {
    async fn mirror_dir(
        &self,
        local_dir: &Utf8Path,
        dest: &str,
        remote_dir: &Utf8Path,
    ) -> Result<(), MirrorError> {
        self.run(mirror_dir_args(local_dir, dest, remote_dir)).await
    }

    async fn copy_file(
        &self,
        local_file: &Utf8Path,
        dest: &str,
        remote_file: &Utf8Path,
    ) -> Result<(), MirrorError> {
        self.run(copy_file_args(local_file, dest, remote_file)).await
    }
}
