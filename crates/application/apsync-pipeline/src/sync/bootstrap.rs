//! Keeps the remote tool installation in lockstep with the local one.
//!
//! The remote tool lockfile is the single source of truth: absent
//! means the workspace was never bootstrapped there, byte-identical
//! means nothing to do, anything else means the gem set drifted and
//! gets reinstalled from the local lock.

use apsync_core::{layout, BootstrapState, Workspace};
use apsync_infra::Connection;
use camino::Utf8Path;
use tracing::{debug, info};

use crate::sync::{DirectoryProvisioner, SyncError};

pub struct BootstrapManager;

impl BootstrapManager {
    /// Compares the remote tool lockfile against the local one.
    pub async fn detect(
        conn: &dyn Connection,
        workspace: &Workspace,
    ) -> Result<BootstrapState, SyncError> {
        let local_lock = workspace.gemfile_lock();
        let remote_lock = conn.target().remote_path(&local_lock);
        if conn.stat(&remote_lock).await?.is_none() {
            return Ok(BootstrapState::Absent);
        }
        let remote = conn.download(&remote_lock).await?;
        let local = read_local(&local_lock)?;
        if remote == local {
            Ok(BootstrapState::UpToDate)
        } else {
            Ok(BootstrapState::Stale)
        }
    }

    /// Drives the remote into the `UpToDate` state. Returns whether the
    /// remote installation was modified.
    pub async fn resolve(
        conn: &dyn Connection,
        workspace: &Workspace,
    ) -> Result<bool, SyncError> {
        match Self::detect(conn, workspace).await? {
            BootstrapState::Absent => {
                info!(target = %conn.target().name, "remote not bootstrapped, installing");
                Self::install(conn, workspace).await?;
                Ok(true)
            }
            BootstrapState::Stale => {
                info!(target = %conn.target().name, "remote tool lockfile drifted, updating");
                Self::update(conn, workspace).await?;
                Ok(true)
            }
            BootstrapState::UpToDate => {
                debug!(target = %conn.target().name, "remote tool installation up to date");
                Ok(false)
            }
        }
    }

    /// Fresh bootstrap: upload the standalone installer with seed
    /// config and gem set under neutral names, then run it in the
    /// remote workspace root.
    async fn install(conn: &dyn Connection, workspace: &Workspace) -> Result<(), SyncError> {
        let remote_root = conn.target().remote_path(&workspace.root_dir);
        DirectoryProvisioner::ensure(conn, &remote_root).await?;

        conn.upload_file(
            &workspace.installer_script,
            &remote_root.join(layout::INSTALL_SCRIPT),
        )
        .await?;
        conn.upload_file(
            &workspace.config_file(),
            &remote_root.join(layout::BOOTSTRAP_CONFIG),
        )
        .await?;
        conn.upload_file(&workspace.gemfile(), &remote_root.join(layout::BOOTSTRAP_GEMFILE))
            .await?;

        let argv = vec![
            workspace.ruby_executable.clone(),
            layout::INSTALL_SCRIPT.to_string(),
            "--gemfile".to_string(),
            layout::BOOTSTRAP_GEMFILE.to_string(),
            "--seed-config".to_string(),
            layout::BOOTSTRAP_CONFIG.to_string(),
        ];
        let result = conn.exec(&argv, Some(&remote_root)).await?;
        if !result.success() {
            return Err(SyncError::Bootstrap(format!(
                "remote installer failed on {}: {}",
                conn.target().name,
                result.output_lossy()
            )));
        }
        Ok(())
    }

    /// Existing installation with a drifted gem set: push the local
    /// lockfile, Gemfile and configuration under their final names and
    /// let the remote bundler reconcile.
    async fn update(conn: &dyn Connection, workspace: &Workspace) -> Result<(), SyncError> {
        let target = conn.target();
        let remote_root = target.remote_path(&workspace.root_dir);

        let local_lock = workspace.gemfile_lock();
        conn.upload(read_local(&local_lock)?, &target.remote_path(&local_lock))
            .await?;
        conn.upload_file(&workspace.gemfile(), &target.remote_path(&workspace.gemfile()))
            .await?;
        conn.upload_file(
            &workspace.config_file(),
            &target.remote_path(&workspace.config_file()),
        )
        .await?;

        let argv: Vec<String> = layout::UPDATE_ARGV.iter().map(|s| s.to_string()).collect();
        let result = conn.exec(&argv, Some(&remote_root)).await?;
        if !result.success() {
            return Err(SyncError::RemoteCommand {
                argv,
                exit_code: result.exit_code,
                exit_signal: result.exit_signal.clone(),
                output: result.output_lossy(),
            });
        }
        Ok(())
    }
}

fn read_local(path: &Utf8Path) -> Result<Vec<u8>, SyncError> {
    std::fs::read(path).map_err(|source| SyncError::Local {
        path: path.to_string(),
        source,
    })
}
