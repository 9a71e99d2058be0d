//! Central configuration constants for runtime limits and defaults.

/// Default number of concurrent artifact transfers per target.
pub const DEFAULT_TRANSFER_WORKERS: usize = 6;

/// Minimum allowed concurrent transfers.
pub const MIN_TRANSFER_WORKERS: usize = 1;

/// Maximum allowed concurrent transfers.
pub const MAX_TRANSFER_WORKERS: usize = 16;

/// Bound on concurrently outstanding SFTP stat probes.
pub const STAT_PROBE_CONCURRENCY: usize = 16;

/// SSH port used when the target URI does not carry one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// How long the interactive exec loop drives the transport before
/// draining local input again, in milliseconds.
pub const INTERACTIVE_POLL_MS: u64 = 25;

/// Convenience function to clamp a worker count into allowed range.
pub fn clamp_workers(v: usize) -> usize {
    v.clamp(MIN_TRANSFER_WORKERS, MAX_TRANSFER_WORKERS)
}
