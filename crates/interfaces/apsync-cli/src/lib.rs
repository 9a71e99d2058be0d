pub mod commands;
pub mod registry;
pub mod workspace;

use apsync_core::BootstrapState;

/// Human label for a bootstrap state in `status` output.
pub fn bootstrap_label(state: BootstrapState) -> &'static str {
    match state {
        BootstrapState::Absent => "not bootstrapped",
        BootstrapState::UpToDate => "up to date",
        BootstrapState::Stale => "needs update",
    }
}
