/// Size and modification time of a single file, local or remote. Used
/// only for comparison, never persisted.
///
/// `mtime_nsec` is `None` when the source cannot report sub-second
/// resolution (SFTP v3 stats carry whole seconds only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFingerprint {
    pub size: u64,
    pub mtime_sec: i64,
    pub mtime_nsec: Option<u32>,
}

impl FileFingerprint {
    /// Whether the remote copy is behind the local one.
    ///
    /// Sizes first, then whole seconds. When seconds match and the
    /// remote lacks sub-second resolution the file counts as
    /// unchanged: a deliberate precision/availability trade-off that
    /// avoids re-transferring on every run against coarse remote
    /// filesystems. When the remote does report nanoseconds they are
    /// compared at microsecond granularity against the local stamp.
    pub fn changed_from(local: &FileFingerprint, remote: &FileFingerprint) -> bool {
        if local.size != remote.size {
            return true;
        }
        if local.mtime_sec != remote.mtime_sec {
            return true;
        }
        match remote.mtime_nsec {
            None => false,
            Some(remote_nsec) => {
                let local_usec = local.mtime_nsec.unwrap_or(0) / 1000;
                remote_nsec / 1000 != local_usec
            }
        }
    }
}
