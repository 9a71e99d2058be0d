//! Persistent registry of configured remotes: a JSON file under the
//! user config directory with one `{name, uri, enabled}` record per
//! remote.

use anyhow::{anyhow, Context, Result};
use apsync_core::RemoteTarget;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const QUALIFIER: &str = "org";
const ORG: &str = "autoproj";
const APP: &str = "sync";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub uri: String,
    pub enabled: bool,
}

impl RemoteEntry {
    pub fn target(&self) -> Result<RemoteTarget> {
        Ok(RemoteTarget::from_uri(&self.name, &self.uri)?)
    }
}

pub struct RemoteRegistry {
    path: PathBuf,
}

impl RemoteRegistry {
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from(QUALIFIER, ORG, APP)
            .ok_or_else(|| anyhow!("could not determine config directory"))?;
        let config_dir = proj_dirs.config_dir();
        if !config_dir.exists() {
            fs::create_dir_all(config_dir)?;
        }
        Ok(Self {
            path: config_dir.join("remotes.json"),
        })
    }

    /// Registry backed by an explicit file, for tests.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn list(&self) -> Result<Vec<RemoteEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).context("failed to read remote registry")?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn find(&self, name: &str) -> Result<RemoteEntry> {
        self.list()?
            .into_iter()
            .find(|r| r.name == name)
            .ok_or_else(|| anyhow!("remote '{}' is not registered", name))
    }

    /// Registers a remote, enabled. The URI must parse so a bad entry
    /// never reaches a sync run.
    pub fn add(&self, name: String, uri: String) -> Result<RemoteEntry> {
        let mut remotes = self.list()?;
        if name.trim().is_empty() {
            return Err(anyhow!("remote name cannot be empty"));
        }
        if remotes.iter().any(|r| r.name == name) {
            return Err(anyhow!("a remote named '{}' already exists", name));
        }
        RemoteTarget::from_uri(&name, &uri)?;

        let entry = RemoteEntry {
            name,
            uri,
            enabled: true,
        };
        remotes.push(entry.clone());
        self.save(&remotes)?;
        Ok(entry)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let mut remotes = self.list()?;
        let original_len = remotes.len();
        remotes.retain(|r| r.name != name);
        if remotes.len() == original_len {
            return Err(anyhow!("remote '{}' is not registered", name));
        }
        self.save(&remotes)
    }

    /// Flips the enabled flag and reports whether it actually changed,
    /// so callers can treat a first-time enable differently from a
    /// repeat.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool> {
        let mut remotes = self.list()?;
        let entry = remotes
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| anyhow!("remote '{}' is not registered", name))?;
        if entry.enabled == enabled {
            return Ok(false);
        }
        entry.enabled = enabled;
        self.save(&remotes)?;
        Ok(true)
    }

    fn save(&self, remotes: &[RemoteEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(remotes)?;
        atomic_write(&self.path, json.as_bytes()).context("failed to write remote registry")
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = {
        let mut name = path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    };

    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    match fs::rename(&tmp_path, path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            fs::remove_file(path).ok();
            fs::rename(&tmp_path, path)
                .with_context(|| format!("failed to replace {}", path.display()))
        }
        Err(e) => {
            Err(e).with_context(|| format!("failed to rename {} into place", tmp_path.display()))
        }
    }
}
