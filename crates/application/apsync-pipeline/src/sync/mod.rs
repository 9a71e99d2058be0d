//! Synchronization pipeline: staleness detection, remote directory
//! provisioning, bootstrap management and the transfer scheduler, tied
//! together by [`engine::SyncEngine`].

pub mod bootstrap;
pub mod engine;
pub mod provision;
pub mod staleness;
pub mod transfer;

use apsync_infra::TransportError;

pub use bootstrap::BootstrapManager;
pub use provision::DirectoryProvisioner;
pub use staleness::StalenessDetector;
pub use transfer::{TransferOutcome, TransferScheduler};

/// Failures raised by the synchronization pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to probe remote state of {artifact}: {source}")]
    StaleDetection {
        artifact: String,
        #[source]
        source: TransportError,
    },

    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("remote command {argv:?} failed ({status}): {output}",
        status = describe_exit(*exit_code, exit_signal.as_deref()))]
    RemoteCommand {
        argv: Vec<String>,
        exit_code: Option<i32>,
        exit_signal: Option<String>,
        output: String,
    },

    #[error("transfer of {artifact} failed: {cause}")]
    Transfer { artifact: String, cause: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("local i/o on {path}: {source}")]
    Local {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn describe_exit(code: Option<i32>, signal: Option<&str>) -> String {
    match (code, signal) {
        (_, Some(signal)) => format!("killed by SIG{signal}"),
        (Some(code), None) => format!("exit code {code}"),
        (None, None) => "unknown status".to_string(),
    }
}

/// Progress notifications emitted while a transfer batch runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Started { artifact: String },
    Completed { artifact: String, success: bool },
}
