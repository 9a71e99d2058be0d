//! Remote `mkdir -p` built from SFTP primitives: probe the ancestor
//! chain concurrently, then create only the missing tail.

use apsync_infra::Connection;
use camino::{Utf8Path, Utf8PathBuf};
use futures::future::try_join_all;
use tracing::debug;

use crate::sync::SyncError;

pub struct DirectoryProvisioner;

impl DirectoryProvisioner {
    /// Ensures `dir` exists on the remote.
    ///
    /// All ancestors up to (but excluding) the filesystem root are
    /// stat'ed concurrently; the contiguous run of missing directories
    /// from the deepest down is then created root-first. An ancestor
    /// that exists stops the walk, so directories that are already
    /// there are never re-created.
    pub async fn ensure(conn: &dyn Connection, dir: &Utf8Path) -> Result<(), SyncError> {
        let chain = ancestor_chain(dir);
        let stats = try_join_all(chain.iter().map(|path| conn.stat(path))).await?;

        let missing: Vec<&Utf8PathBuf> = chain
            .iter()
            .zip(&stats)
            .take_while(|(_, stat)| stat.is_none())
            .map(|(path, _)| path)
            .collect();

        for path in missing.iter().rev() {
            debug!(%path, "creating remote directory");
            conn.mkdir(path).await?;
        }
        Ok(())
    }
}

/// `dir` and its ancestors, deepest first, stopping before `/`.
fn ancestor_chain(dir: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut chain = Vec::new();
    let mut current = dir;
    while current != Utf8Path::new("/") && !current.as_str().is_empty() {
        chain.push(current.to_owned());
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    chain
}
