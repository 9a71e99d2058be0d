//! Workspace resolution shim. Package resolution itself lives in the
//! build tool; this side only reads the manifest it exports, a JSON
//! file listing the workspace directories, the built artifacts and the
//! osdep partition.

use anyhow::{Context, Result};
use apsync_core::{Artifact, Workspace};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};

pub const MANIFEST_RELATIVE: &str = ".autoproj/sync-manifest.json";

/// Packages to install through one package manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsdepGroup {
    pub manager: String,
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncManifest {
    pub workspace: Workspace,
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub osdeps: Vec<OsdepGroup>,
}

impl SyncManifest {
    /// Osdep groups with the `native` manager first: system packages
    /// must be in place before language-level managers run.
    pub fn ordered_osdeps(&self) -> Vec<&OsdepGroup> {
        let mut groups: Vec<&OsdepGroup> = self.osdeps.iter().collect();
        groups.sort_by_key(|g| g.manager != "native");
        groups
    }
}

pub fn load_manifest(root: &Utf8Path) -> Result<SyncManifest> {
    let path = root.join(MANIFEST_RELATIVE);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read workspace manifest {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("malformed workspace manifest {path}"))
}
