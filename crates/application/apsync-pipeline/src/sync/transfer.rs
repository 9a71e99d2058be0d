//! Runs a transfer plan: provisions every destination directory up
//! front, then mirrors artifacts through a bounded worker pool.

use apsync_core::Artifact;
use apsync_infra::{Connection, TransferRunner};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::sync::{DirectoryProvisioner, SyncError, TransferEvent};

/// Terminal state of one artifact's transfer.
#[derive(Debug)]
pub struct TransferOutcome {
    pub artifact: String,
    pub result: Result<(), SyncError>,
}

pub struct TransferScheduler {
    runner: Arc<dyn TransferRunner>,
    workers: usize,
}

impl TransferScheduler {
    pub fn new(runner: Arc<dyn TransferRunner>, workers: usize) -> Self {
        Self {
            runner,
            workers: apsync_config::clamp_workers(workers),
        }
    }

    /// Transfers every artifact in `plan` and reports one outcome per
    /// artifact, completion order. All destination directories are
    /// provisioned before the first byte moves, so no worker races a
    /// mkdir. A failed transfer does not stop the others and nothing
    /// already mirrored is rolled back.
    pub async fn run(
        &self,
        conn: &dyn Connection,
        plan: &[Artifact],
        events: Option<mpsc::Sender<TransferEvent>>,
    ) -> Result<Vec<TransferOutcome>, SyncError> {
        let target = conn.target().clone();
        for artifact in plan {
            DirectoryProvisioner::ensure(conn, &target.remote_path(&artifact.prefix_dir)).await?;
            if let Some(stamp_dir) = artifact.installstamp.parent() {
                DirectoryProvisioner::ensure(conn, &target.remote_path(stamp_dir)).await?;
            }
        }

        let dest = target.rsync_target();
        let outcomes = futures::stream::iter(plan.iter().cloned().map(|artifact| {
            let runner = Arc::clone(&self.runner);
            let target = target.clone();
            let dest = dest.clone();
            let events = events.clone();
            async move {
                notify(&events, TransferEvent::Started {
                    artifact: artifact.name.clone(),
                })
                .await;
                debug!(artifact = %artifact.name, "mirroring");

                let result = transfer_one(runner.as_ref(), &artifact, &dest, &target).await;
                notify(&events, TransferEvent::Completed {
                    artifact: artifact.name.clone(),
                    success: result.is_ok(),
                })
                .await;
                TransferOutcome {
                    artifact: artifact.name,
                    result,
                }
            }
        }))
        .buffer_unordered(self.workers)
        .collect::<Vec<_>>()
        .await;

        Ok(outcomes)
    }
}

async fn transfer_one(
    runner: &dyn TransferRunner,
    artifact: &Artifact,
    dest: &str,
    target: &apsync_core::RemoteTarget,
) -> Result<(), SyncError> {
    runner
        .mirror_dir(
            &artifact.prefix_dir,
            dest,
            &target.remote_path(&artifact.prefix_dir),
        )
        .await
        .map_err(|err| SyncError::Transfer {
            artifact: artifact.name.clone(),
            cause: err.to_string(),
        })?;
    // The installstamp goes over last: its presence on the remote
    // asserts the whole prefix made it.
    runner
        .copy_file(
            &artifact.installstamp,
            dest,
            &target.remote_path(&artifact.installstamp),
        )
        .await
        .map_err(|err| SyncError::Transfer {
            artifact: artifact.name.clone(),
            cause: err.to_string(),
        })
}

async fn notify(events: &Option<mpsc::Sender<TransferEvent>>, event: TransferEvent) {
    if let Some(tx) = events {
        if tx.send(event).await.is_err() {
            warn!("transfer event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apsync_core::{FileFingerprint, RemoteTarget};
    use apsync_infra::{MirrorError, TransportError};
    use async_trait::async_trait;
    use camino::{Utf8Path, Utf8PathBuf};
    use std::sync::Mutex;

    struct FakeConnection {
        target: RemoteTarget,
        mkdir_calls: Mutex<Vec<Utf8PathBuf>>,
    }

    impl FakeConnection {
        fn new() -> Self {
            Self {
                target: RemoteTarget::from_uri("lab", "ssh://dev@lab/srv/mirror").unwrap(),
                mkdir_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Connection for FakeConnection {
        fn target(&self) -> &RemoteTarget {
            &self.target
        }

        async fn stat(
            &self,
            _path: &Utf8Path,
        ) -> Result<Option<FileFingerprint>, TransportError> {
            Ok(None)
        }

        async fn mkdir(&self, path: &Utf8Path) -> Result<(), TransportError> {
            self.mkdir_calls.lock().unwrap().push(path.to_owned());
            Ok(())
        }

        async fn upload(&self, _bytes: Vec<u8>, _remote: &Utf8Path) -> Result<(), TransportError> {
            unimplemented!("not used by the scheduler")
        }

        async fn upload_file(
            &self,
            _local: &Utf8Path,
            _remote: &Utf8Path,
        ) -> Result<(), TransportError> {
            unimplemented!("not used by the scheduler")
        }

        async fn download(&self, _remote: &Utf8Path) -> Result<Vec<u8>, TransportError> {
            unimplemented!("not used by the scheduler")
        }

        async fn exec(
            &self,
            _argv: &[String],
            _cwd: Option<&Utf8Path>,
        ) -> Result<apsync_core::ExecResult, TransportError> {
            unimplemented!("not used by the scheduler")
        }
    }

    #[derive(Default)]
    struct FakeRunner {
        mirrored: Mutex<Vec<(Utf8PathBuf, String, Utf8PathBuf)>>,
        copied: Mutex<Vec<(Utf8PathBuf, String, Utf8PathBuf)>>,
        fail_dirs: Vec<Utf8PathBuf>,
    }

    #[async_trait]
    impl TransferRunner for FakeRunner {
        async fn mirror_dir(
            &self,
            local_dir: &Utf8Path,
            dest: &str,
            remote_dir: &Utf8Path,
        ) -> Result<(), MirrorError> {
            if self.fail_dirs.iter().any(|d| d == local_dir) {
                return Err(MirrorError::Failed {
                    code: Some(23),
                    stderr: "partial transfer".into(),
                });
            }
            self.mirrored.lock().unwrap().push((
                local_dir.to_owned(),
                dest.to_string(),
                remote_dir.to_owned(),
            ));
            Ok(())
        }

        async fn copy_file(
            &self,
            local_file: &Utf8Path,
            dest: &str,
            remote_file: &Utf8Path,
        ) -> Result<(), MirrorError> {
            self.copied.lock().unwrap().push((
                local_file.to_owned(),
                dest.to_string(),
                remote_file.to_owned(),
            ));
            Ok(())
        }
    }

    fn artifact(name: &str) -> Artifact {
        Artifact::new(
            name,
            format!("/ws/prefix/{name}"),
            format!("/ws/prefix/{name}/installstamp"),
        )
    }

    #[tokio::test]
    async fn provisions_then_mirrors_prefix_and_stamp() {
        let runner = Arc::new(FakeRunner::default());
        let conn = FakeConnection::new();
        let scheduler = TransferScheduler::new(runner.clone(), 4);

        let outcomes = scheduler
            .run(&conn, &[artifact("pkg")], None)
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_ok());

        // Destination directory was provisioned before the transfer.
        assert!(conn
            .mkdir_calls
            .lock()
            .unwrap()
            .contains(&Utf8PathBuf::from("/srv/mirror/ws/prefix/pkg")));

        let mirrored = runner.mirrored.lock().unwrap();
        assert_eq!(
            *mirrored,
            vec![(
                Utf8PathBuf::from("/ws/prefix/pkg"),
                "dev@lab".to_string(),
                Utf8PathBuf::from("/srv/mirror/ws/prefix/pkg"),
            )]
        );
        let copied = runner.copied.lock().unwrap();
        assert_eq!(
            *copied,
            vec![(
                Utf8PathBuf::from("/ws/prefix/pkg/installstamp"),
                "dev@lab".to_string(),
                Utf8PathBuf::from("/srv/mirror/ws/prefix/pkg/installstamp"),
            )]
        );
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_batch() {
        let runner = Arc::new(FakeRunner {
            fail_dirs: vec![Utf8PathBuf::from("/ws/prefix/bad")],
            ..FakeRunner::default()
        });
        let conn = FakeConnection::new();
        let scheduler = TransferScheduler::new(runner.clone(), 2);

        let outcomes = scheduler
            .run(&conn, &[artifact("bad"), artifact("good")], None)
            .await
            .unwrap();

        let failed: Vec<_> = outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| o.artifact.as_str())
            .collect();
        assert_eq!(failed, vec!["bad"]);
        assert_eq!(runner.mirrored.lock().unwrap().len(), 1);
        // The failed artifact's stamp never went over.
        assert_eq!(runner.copied.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn emits_started_and_completed_events() {
        let runner = Arc::new(FakeRunner::default());
        let conn = FakeConnection::new();
        let scheduler = TransferScheduler::new(runner, 2);
        let (tx, mut rx) = mpsc::channel(16);

        scheduler
            .run(&conn, &[artifact("pkg")], Some(tx))
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                TransferEvent::Started {
                    artifact: "pkg".to_string()
                },
                TransferEvent::Completed {
                    artifact: "pkg".to_string(),
                    success: true
                },
            ]
        );
    }
}
