use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

pub mod fingerprint;
pub mod layout;
pub mod path_utils;
pub mod target;

pub use fingerprint::FileFingerprint;
pub use target::{RemoteTarget, TargetError};

/// One built package: its installed file tree plus the installstamp
/// marker whose existence and mtime denote a successful local build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    /// Root of the artifact's installed files.
    pub prefix_dir: Utf8PathBuf,
    /// Marker file written at the end of a successful build.
    pub installstamp: Utf8PathBuf,
}

impl Artifact {
    pub fn new(
        name: impl Into<String>,
        prefix_dir: impl Into<Utf8PathBuf>,
        installstamp: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            prefix_dir: prefix_dir.into(),
            installstamp: installstamp.into(),
        }
    }
}

/// Local workspace descriptor. Resolution of the workspace itself
/// (package sets, dependency graphs) is the caller's concern; the sync
/// core only needs the directories and the bootstrap inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub root_dir: Utf8PathBuf,
    pub prefix_dir: Utf8PathBuf,
    /// Interpreter used to run the remote installer script.
    #[serde(default = "default_ruby")]
    pub ruby_executable: String,
    /// Local path of the standalone installer script uploaded during
    /// a fresh remote bootstrap.
    pub installer_script: Utf8PathBuf,
}

fn default_ruby() -> String {
    "ruby".to_string()
}

impl Workspace {
    /// Workspace metadata files copied to the remote after every sync:
    /// environment descriptors, the installation manifest and the
    /// dependency lock files.
    pub fn annex_files(&self) -> Vec<Utf8PathBuf> {
        vec![
            self.root_dir.join(layout::ENV_FILE),
            self.root_dir.join(layout::INSTALLATION_MANIFEST),
            self.prefix_dir.join(layout::PREFIX_GEMFILE),
            self.prefix_dir.join(layout::PREFIX_GEMFILE_LOCK),
        ]
    }

    pub fn gemfile_lock(&self) -> Utf8PathBuf {
        self.root_dir.join(layout::GEMFILE_LOCK)
    }

    pub fn gemfile(&self) -> Utf8PathBuf {
        self.root_dir.join(layout::GEMFILE)
    }

    pub fn config_file(&self) -> Utf8PathBuf {
        self.root_dir.join(layout::CONFIG_FILE)
    }
}

/// Result of one remote command run. Exactly one of `exit_code` /
/// `exit_signal` is authoritative: a signal means the process did not
/// exit normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
    /// Combined stdout + stderr, sentinel line already stripped.
    pub output: Vec<u8>,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_signal.is_none() && self.exit_code == Some(0)
    }

    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Remote bootstrap state, computed fresh on every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// No tool lockfile on the remote.
    Absent,
    /// Remote lockfile is byte-identical to the local one.
    UpToDate,
    /// Remote lockfile differs from the local one.
    Stale,
}

/// Per-target terminal value of a sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub target: String,
    pub bootstrapped: bool,
    pub transferred: Vec<String>,
    pub failures: Vec<SyncFailure>,
}

impl SyncOutcome {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            bootstrapped: false,
            transferred: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncFailure {
    /// `None` for failures not tied to a single artifact (bootstrap,
    /// staleness probing, annex upload).
    pub artifact: Option<String>,
    pub cause: String,
}
