//! End-to-end pipeline runs against an in-memory remote.

use apsync_core::{layout, Artifact, ExecResult, FileFingerprint, RemoteTarget, Workspace};
use apsync_infra::{Connection, MirrorError, TransferRunner, TransportError};
use apsync_pipeline::SyncEngine;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory remote filesystem plus a scripted command runner.
struct FakeRemote {
    target: RemoteTarget,
    files: Mutex<HashMap<Utf8PathBuf, Vec<u8>>>,
    /// Whole-second mtimes reported by `stat`, keyed by path.
    mtimes: Mutex<HashMap<Utf8PathBuf, i64>>,
    dirs: Mutex<Vec<Utf8PathBuf>>,
    exec_calls: Mutex<Vec<Vec<String>>>,
    exec_result: ExecResult,
}

impl FakeRemote {
    fn new() -> Self {
        Self {
            target: RemoteTarget::from_uri("lab", "ssh://dev@lab/srv/mirror").unwrap(),
            files: Mutex::new(HashMap::new()),
            mtimes: Mutex::new(HashMap::new()),
            dirs: Mutex::new(Vec::new()),
            exec_calls: Mutex::new(Vec::new()),
            exec_result: ExecResult {
                exit_code: Some(0),
                exit_signal: None,
                output: Vec::new(),
            },
        }
    }

    fn put(&self, path: impl Into<Utf8PathBuf>, contents: &[u8]) {
        self.files.lock().unwrap().insert(path.into(), contents.to_vec());
    }

    fn put_with_mtime(&self, path: impl Into<Utf8PathBuf>, contents: &[u8], mtime_sec: i64) {
        let path = path.into();
        self.mtimes.lock().unwrap().insert(path.clone(), mtime_sec);
        self.files.lock().unwrap().insert(path, contents.to_vec());
    }

    fn has_file(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(Utf8Path::new(path))
    }
}

#[async_trait]
impl Connection for FakeRemote {
    fn target(&self) -> &RemoteTarget {
        &self.target
    }

    async fn stat(&self, path: &Utf8Path) -> Result<Option<FileFingerprint>, TransportError> {
        let size = self.files.lock().unwrap().get(path).map(|c| c.len() as u64);
        if let Some(size) = size {
            let mtime_sec = self.mtimes.lock().unwrap().get(path).copied().unwrap_or(0);
            return Ok(Some(FileFingerprint {
                size,
                mtime_sec,
                mtime_nsec: None,
            }));
        }
        if self.dirs.lock().unwrap().iter().any(|d| d == path) {
            return Ok(Some(FileFingerprint {
                size: 0,
                mtime_sec: 0,
                mtime_nsec: None,
            }));
        }
        Ok(None)
    }

    async fn mkdir(&self, path: &Utf8Path) -> Result<(), TransportError> {
        self.dirs.lock().unwrap().push(path.to_owned());
        Ok(())
    }

    async fn upload(&self, bytes: Vec<u8>, remote: &Utf8Path) -> Result<(), TransportError> {
        self.files.lock().unwrap().insert(remote.to_owned(), bytes);
        Ok(())
    }

    async fn upload_file(&self, local: &Utf8Path, remote: &Utf8Path) -> Result<(), TransportError> {
        let bytes = std::fs::read(local)?;
        self.files.lock().unwrap().insert(remote.to_owned(), bytes);
        Ok(())
    }

    async fn download(&self, remote: &Utf8Path) -> Result<Vec<u8>, TransportError> {
        self.files
            .lock()
            .unwrap()
            .get(remote)
            .cloned()
            .ok_or_else(|| TransportError::Command(format!("no such file {remote}")))
    }

    async fn exec(
        &self,
        argv: &[String],
        _cwd: Option<&Utf8Path>,
    ) -> Result<ExecResult, TransportError> {
        self.exec_calls.lock().unwrap().push(argv.to_vec());
        Ok(self.exec_result.clone())
    }
}

#[derive(Default)]
struct FakeRunner {
    mirrored: Mutex<Vec<Utf8PathBuf>>,
    copied: Mutex<Vec<Utf8PathBuf>>,
    fail_dirs: Vec<Utf8PathBuf>,
}

#[async_trait]
impl TransferRunner for FakeRunner {
    async fn mirror_dir(
        &self,
        local_dir: &Utf8Path,
        _dest: &str,
        _remote_dir: &Utf8Path,
    ) -> Result<(), MirrorError> {
        if self.fail_dirs.iter().any(|d| d == local_dir) {
            return Err(MirrorError::Failed {
                code: Some(12),
                stderr: "broken pipe".into(),
            });
        }
        self.mirrored.lock().unwrap().push(local_dir.to_owned());
        Ok(())
    }

    async fn copy_file(
        &self,
        local_file: &Utf8Path,
        _dest: &str,
        _remote_file: &Utf8Path,
    ) -> Result<(), MirrorError> {
        self.copied.lock().unwrap().push(local_file.to_owned());
        Ok(())
    }
}

/// Builds a real on-disk workspace with `names` built artifacts.
fn workspace_with_artifacts(dir: &Utf8Path, names: &[&str]) -> (Workspace, Vec<Artifact>) {
    let root = dir.join("ws");
    let prefix = root.join("install");
    std::fs::create_dir_all(root.join(".autoproj")).unwrap();
    std::fs::create_dir_all(prefix.join("gems")).unwrap();

    std::fs::write(root.join(layout::GEMFILE_LOCK), b"GEM lock v1").unwrap();
    std::fs::write(root.join(layout::GEMFILE), b"gemfile").unwrap();
    std::fs::write(root.join(layout::CONFIG_FILE), b"---\n").unwrap();
    std::fs::write(root.join(layout::ENV_FILE), b"env").unwrap();
    std::fs::write(root.join(layout::INSTALLATION_MANIFEST), b"manifest").unwrap();
    std::fs::write(prefix.join(layout::PREFIX_GEMFILE), b"prefix gemfile").unwrap();
    std::fs::write(prefix.join(layout::PREFIX_GEMFILE_LOCK), b"prefix lock").unwrap();

    let installer = dir.join("autoproj_install");
    std::fs::write(&installer, b"#!/usr/bin/env ruby").unwrap();

    let artifacts = names
        .iter()
        .map(|name| {
            let artifact_prefix = prefix.join(name);
            std::fs::create_dir_all(&artifact_prefix).unwrap();
            let stamp = artifact_prefix.join("installstamp");
            std::fs::write(&stamp, b"built").unwrap();
            Artifact::new(*name, artifact_prefix, stamp)
        })
        .collect();

    let workspace = Workspace {
        root_dir: root,
        prefix_dir: prefix,
        ruby_executable: "ruby".to_string(),
        installer_script: installer,
    };
    (workspace, artifacts)
}

fn remote_path_of(ws_path: &Utf8Path) -> String {
    format!("/srv/mirror{ws_path}")
}

#[tokio::test]
async fn fresh_target_is_bootstrapped_and_outdated_artifacts_mirrored() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(tmp.path()).unwrap();
    let (workspace, artifacts) = workspace_with_artifacts(dir, &["base", "drivers", "tools"]);

    let remote = FakeRemote::new();
    // "base" has no remote stamp at all; "drivers" is there but with a
    // different size; "tools" is in lockstep. Only the first two go
    // over.
    let drivers_stamp = &artifacts[1].installstamp;
    filetime::set_file_mtime(
        drivers_stamp,
        filetime::FileTime::from_unix_time(1_700_000_000, 0),
    )
    .unwrap();
    remote.put_with_mtime(remote_path_of(drivers_stamp), b"stale..", 1_700_000_000);
    let tools_stamp = &artifacts[2].installstamp;
    filetime::set_file_mtime(
        tools_stamp,
        filetime::FileTime::from_unix_time(1_700_000_000, 0),
    )
    .unwrap();
    remote.put_with_mtime(remote_path_of(tools_stamp), b"built", 1_700_000_000);

    let runner = Arc::new(FakeRunner::default());
    let engine = SyncEngine::with_runner(runner.clone(), 4);

    let outcome = engine
        .sync(&remote, &workspace, &artifacts, None)
        .await
        .unwrap();

    assert!(outcome.is_success(), "failures: {:?}", outcome.failures);
    assert!(outcome.bootstrapped);
    assert_eq!(outcome.transferred.len(), 2);

    // The installer ran with the uploaded bootstrap inputs.
    let execs = remote.exec_calls.lock().unwrap().clone();
    assert_eq!(execs.len(), 1);
    assert!(execs[0].contains(&"autoproj_install".to_string()));
    assert!(remote.has_file(&remote_path_of(
        &workspace.root_dir.join("bootstrap-Gemfile")
    )));

    // Exactly the two outdated prefixes and stamps went over.
    assert_eq!(runner.mirrored.lock().unwrap().len(), 2);
    assert_eq!(runner.copied.lock().unwrap().len(), 2);
    assert!(!outcome.transferred.contains(&"tools".to_string()));

    // Annex files were pushed after the transfers.
    assert!(remote.has_file(&remote_path_of(&workspace.root_dir.join(layout::ENV_FILE))));
    assert!(remote.has_file(&remote_path_of(
        &workspace.prefix_dir.join(layout::PREFIX_GEMFILE_LOCK)
    )));
}

#[tokio::test]
async fn failed_bootstrap_update_aborts_the_target_before_any_transfer() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(tmp.path()).unwrap();
    let (workspace, artifacts) = workspace_with_artifacts(dir, &["base"]);

    let mut remote = FakeRemote::new();
    remote.exec_result = ExecResult {
        exit_code: Some(1),
        exit_signal: None,
        output: b"Bundler::GemNotFound".to_vec(),
    };
    // Drifted lockfile forces the update path; its bundler run fails.
    remote.put(remote_path_of(&workspace.gemfile_lock()), b"GEM lock v0");
    let runner = Arc::new(FakeRunner::default());
    let engine = SyncEngine::with_runner(runner.clone(), 4);

    let outcome = engine
        .sync(&remote, &workspace, &artifacts, None)
        .await
        .unwrap();

    assert!(!outcome.is_success());
    assert_eq!(outcome.failures.len(), 1);
    assert!(outcome.failures[0].artifact.is_none());
    assert!(outcome.failures[0].cause.contains("Bundler::GemNotFound"));
    assert!(outcome.transferred.is_empty());
    assert!(runner.mirrored.lock().unwrap().is_empty());
}

#[tokio::test]
async fn partial_transfer_failure_keeps_the_rest_and_the_annex() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(tmp.path()).unwrap();
    let (workspace, artifacts) =
        workspace_with_artifacts(dir, &["a", "b", "c", "bad", "d", "e"]);

    let remote = FakeRemote::new();
    // Remote already bootstrapped and in lockstep.
    remote.put(
        remote_path_of(&workspace.gemfile_lock()),
        b"GEM lock v1",
    );

    let runner = Arc::new(FakeRunner {
        fail_dirs: vec![workspace.prefix_dir.join("bad")],
        ..FakeRunner::default()
    });
    let engine = SyncEngine::with_runner(runner.clone(), 4);

    let outcome = engine
        .sync(&remote, &workspace, &artifacts, None)
        .await
        .unwrap();

    assert!(!outcome.bootstrapped);
    let mut transferred = outcome.transferred.clone();
    transferred.sort();
    assert_eq!(transferred, vec!["a", "b", "c", "d", "e"]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].artifact.as_deref(), Some("bad"));
    assert!(outcome.failures[0].cause.contains("broken pipe"));

    // The surviving transfers are not rolled back and the annex still
    // describes the workspace.
    assert_eq!(runner.mirrored.lock().unwrap().len(), 5);
    assert!(remote.has_file(&remote_path_of(&workspace.root_dir.join(layout::ENV_FILE))));
}

#[tokio::test]
async fn up_to_date_target_transfers_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(tmp.path()).unwrap();
    let (workspace, artifacts) = workspace_with_artifacts(dir, &["base"]);

    let remote = FakeRemote::new();
    remote.put(
        remote_path_of(&workspace.gemfile_lock()),
        b"GEM lock v1",
    );
    // Remote stamp with matching size and second; as over SFTP, the
    // fake reports whole seconds only.
    let local_stamp = &artifacts[0].installstamp;
    filetime::set_file_mtime(local_stamp, filetime::FileTime::from_unix_time(1_700_000_000, 0))
        .unwrap();
    remote.put_with_mtime(remote_path_of(local_stamp), b"built", 1_700_000_000);

    let runner = Arc::new(FakeRunner::default());
    let engine = SyncEngine::with_runner(runner.clone(), 4);

    let outcome = engine
        .sync(&remote, &workspace, &artifacts, None)
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert!(outcome.transferred.is_empty());
    assert!(runner.mirrored.lock().unwrap().is_empty());
}

#[tokio::test]
async fn status_reports_without_touching_the_remote() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(tmp.path()).unwrap();
    let (workspace, artifacts) = workspace_with_artifacts(dir, &["base"]);

    let remote = FakeRemote::new();
    remote.put(
        remote_path_of(&workspace.gemfile_lock()),
        b"GEM lock v0",
    );

    let engine = SyncEngine::with_runner(Arc::new(FakeRunner::default()), 4);
    let report = engine.status(&remote, &workspace, &artifacts).await.unwrap();

    assert_eq!(report.bootstrap, apsync_core::BootstrapState::Stale);
    assert_eq!(report.outdated, vec!["base".to_string()]);
    // Nothing ran, nothing was written.
    assert!(remote.exec_calls.lock().unwrap().is_empty());
    assert!(remote.dirs.lock().unwrap().is_empty());
}
