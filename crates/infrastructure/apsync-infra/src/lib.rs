pub mod mirror;
pub mod ssh;

// Re-exports for convenience
pub use mirror::{MirrorError, RsyncRunner, TransferRunner};
pub use ssh::{Connection, ExecError, RemoteExec, SshConnection, TransportError};
