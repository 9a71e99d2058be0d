//! Per-target orchestration: bootstrap, classify, transfer, annex.

use apsync_core::{Artifact, BootstrapState, RemoteTarget, SyncFailure, SyncOutcome, Workspace};
use apsync_infra::{Connection, RsyncRunner, SshConnection, TransferRunner};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::sync::{
    BootstrapManager, DirectoryProvisioner, StalenessDetector, SyncError, TransferEvent,
    TransferScheduler,
};

/// Read-only inspection of one target, produced by [`SyncEngine::status`].
#[derive(Debug)]
pub struct StatusReport {
    pub target: String,
    pub bootstrap: BootstrapState,
    /// Names of artifacts a sync run would transfer.
    pub outdated: Vec<String>,
}

/// Runs the full pipeline against one target. Every run is stateless:
/// nothing is remembered between invocations, all decisions come from
/// comparing the two filesystems.
pub struct SyncEngine {
    runner: Arc<dyn TransferRunner>,
    workers: usize,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::with_runner(
            Arc::new(RsyncRunner),
            apsync_config::DEFAULT_TRANSFER_WORKERS,
        )
    }

    pub fn with_runner(runner: Arc<dyn TransferRunner>, workers: usize) -> Self {
        Self { runner, workers }
    }

    /// Connects to `target` and synchronizes the workspace onto it.
    /// The connection is torn down on every exit path.
    pub async fn sync_target(
        &self,
        target: &RemoteTarget,
        workspace: &Workspace,
        artifacts: &[Artifact],
        events: Option<mpsc::Sender<TransferEvent>>,
    ) -> Result<SyncOutcome, SyncError> {
        let conn = SshConnection::connect(target.clone())
            .await
            .map_err(|source| SyncError::Connect {
                target: target.name.clone(),
                source,
            })?;
        self.sync(&conn, workspace, artifacts, events).await
    }

    /// Pipeline body over an established connection. Bootstrap and
    /// staleness failures abort the target and land in
    /// `SyncOutcome::failures`; per-artifact transfer failures are
    /// recorded but do not stop the other transfers.
    pub async fn sync(
        &self,
        conn: &dyn Connection,
        workspace: &Workspace,
        artifacts: &[Artifact],
        events: Option<mpsc::Sender<TransferEvent>>,
    ) -> Result<SyncOutcome, SyncError> {
        let mut outcome = SyncOutcome::new(&conn.target().name);

        match BootstrapManager::resolve(conn, workspace).await {
            Ok(bootstrapped) => outcome.bootstrapped = bootstrapped,
            Err(err) => {
                warn!(target = %outcome.target, %err, "bootstrap failed, aborting target");
                outcome.failures.push(SyncFailure {
                    artifact: None,
                    cause: err.to_string(),
                });
                return Ok(outcome);
            }
        }

        let plan = match StalenessDetector::classify(conn, artifacts).await {
            Ok(plan) => plan,
            Err(err) => {
                warn!(target = %outcome.target, %err, "staleness probing failed, aborting target");
                outcome.failures.push(SyncFailure {
                    artifact: None,
                    cause: err.to_string(),
                });
                return Ok(outcome);
            }
        };
        info!(
            target = %outcome.target,
            outdated = plan.len(),
            total = artifacts.len(),
            "transfer plan ready"
        );

        let scheduler = TransferScheduler::new(Arc::clone(&self.runner), self.workers);
        match scheduler.run(conn, &plan, events).await {
            Ok(outcomes) => {
                for transfer in outcomes {
                    match transfer.result {
                        Ok(()) => outcome.transferred.push(transfer.artifact),
                        Err(err) => outcome.failures.push(SyncFailure {
                            artifact: Some(transfer.artifact),
                            cause: err.to_string(),
                        }),
                    }
                }
            }
            Err(err) => {
                outcome.failures.push(SyncFailure {
                    artifact: None,
                    cause: err.to_string(),
                });
                return Ok(outcome);
            }
        }

        self.upload_annex(conn, workspace, &mut outcome).await;
        Ok(outcome)
    }

    /// Pushes the workspace metadata files after the artifact transfers
    /// so the remote always describes what it actually holds. Missing
    /// local files are skipped; upload failures are recorded but do not
    /// fail the artifacts already mirrored.
    async fn upload_annex(
        &self,
        conn: &dyn Connection,
        workspace: &Workspace,
        outcome: &mut SyncOutcome,
    ) {
        for local in workspace.annex_files() {
            if !local.is_file() {
                warn!(%local, "annex file missing locally, skipping");
                continue;
            }
            let remote = conn.target().remote_path(&local);
            let result = async {
                if let Some(parent) = remote.parent() {
                    DirectoryProvisioner::ensure(conn, parent).await?;
                }
                conn.upload_file(&local, &remote).await?;
                Ok::<_, SyncError>(())
            }
            .await;
            if let Err(err) = result {
                outcome.failures.push(SyncFailure {
                    artifact: None,
                    cause: format!("annex upload of {local} failed: {err}"),
                });
            }
        }
    }

    /// Connects to `target` and reports what a sync would do, without
    /// modifying anything on either side.
    pub async fn status_target(
        &self,
        target: &RemoteTarget,
        workspace: &Workspace,
        artifacts: &[Artifact],
    ) -> Result<StatusReport, SyncError> {
        let conn = SshConnection::connect(target.clone())
            .await
            .map_err(|source| SyncError::Connect {
                target: target.name.clone(),
                source,
            })?;
        self.status(&conn, workspace, artifacts).await
    }

    pub async fn status(
        &self,
        conn: &dyn Connection,
        workspace: &Workspace,
        artifacts: &[Artifact],
    ) -> Result<StatusReport, SyncError> {
        let bootstrap = BootstrapManager::detect(conn, workspace).await?;
        let plan = StalenessDetector::classify(conn, artifacts).await?;
        Ok(StatusReport {
            target: conn.target().name.clone(),
            bootstrap,
            outdated: plan.into_iter().map(|a| a.name).collect(),
        })
    }
}
