//! Decides which artifacts need to go over the wire by comparing
//! installstamp fingerprints on both sides.

use apsync_core::{Artifact, FileFingerprint};
use apsync_infra::Connection;
use camino::Utf8Path;
use filetime::FileTime;
use futures::StreamExt;
use tracing::debug;

use crate::sync::SyncError;

pub struct StalenessDetector;

impl StalenessDetector {
    /// Returns the subset of `artifacts` whose remote copy is missing
    /// or behind the local installstamp, in the input order.
    ///
    /// Artifacts without a local installstamp were never built and are
    /// dropped without touching the remote at all. A missing remote
    /// stamp marks the artifact outdated; a stat that fails for any
    /// other reason aborts classification, since treating it as "not
    /// there" would schedule a spurious full transfer.
    pub async fn classify(
        conn: &dyn Connection,
        artifacts: &[Artifact],
    ) -> Result<Vec<Artifact>, SyncError> {
        let candidates: Vec<(Artifact, FileFingerprint)> = artifacts
            .iter()
            .filter_map(|artifact| {
                match local_fingerprint(&artifact.installstamp) {
                    Some(local) => Some((artifact.clone(), local)),
                    None => {
                        debug!(artifact = %artifact.name, "no local installstamp, skipping");
                        None
                    }
                }
            })
            .collect();

        let probes = futures::stream::iter(candidates.into_iter().map(|(artifact, local)| {
            let remote_stamp = conn.target().remote_path(&artifact.installstamp);
            async move {
                let remote = conn.stat(&remote_stamp).await.map_err(|source| {
                    SyncError::StaleDetection {
                        artifact: artifact.name.clone(),
                        source,
                    }
                })?;
                let outdated = match remote {
                    None => true,
                    Some(remote) => FileFingerprint::changed_from(&local, &remote),
                };
                Ok::<_, SyncError>((artifact, outdated))
            }
        }))
        // `buffered` keeps the input order, so the transfer plan is
        // deterministic for a given artifact list.
        .buffered(apsync_config::STAT_PROBE_CONCURRENCY)
        .collect::<Vec<_>>()
        .await;

        let mut plan = Vec::new();
        for probe in probes {
            let (artifact, outdated) = probe?;
            if outdated {
                debug!(artifact = %artifact.name, "outdated, scheduling transfer");
                plan.push(artifact);
            }
        }
        Ok(plan)
    }
}

/// Fingerprint of a local file, `None` when it does not exist.
pub fn local_fingerprint(path: &Utf8Path) -> Option<FileFingerprint> {
    let meta = std::fs::metadata(path).ok()?;
    let mtime = FileTime::from_last_modification_time(&meta);
    Some(FileFingerprint {
        size: meta.len(),
        mtime_sec: mtime.unix_seconds(),
        mtime_nsec: Some(mtime.nanoseconds()),
    })
}
