//! Fixed file names of the remote workspace layout. These are wire
//! conventions shared with the remote tooling and must not change.

/// Dependency lockfile probed to decide the bootstrap state.
pub const GEMFILE_LOCK: &str = ".autoproj/Gemfile.lock";

/// Dependency manifest uploaded on update.
pub const GEMFILE: &str = ".autoproj/Gemfile";

/// Tool configuration uploaded on install and update.
pub const CONFIG_FILE: &str = ".autoproj/config.yml";

/// Name the installer script is uploaded under in the remote root.
pub const INSTALL_SCRIPT: &str = "autoproj_install";

/// Bootstrap-specific upload names. A fresh install uses these rather
/// than the final names so that a half-finished install never looks
/// complete to a later probe.
pub const BOOTSTRAP_GEMFILE: &str = "bootstrap-Gemfile";
pub const BOOTSTRAP_CONFIG: &str = "bootstrap-config.yml";

/// Self-update command run from the remote root when the lockfile
/// changed.
pub const UPDATE_ARGV: &[&str] = &[".autoproj/bin/bundler", "install"];

/// Remote entry point for ad-hoc `exec` and osdeps installation.
pub const REMOTE_TOOL: &str = ".autoproj/bin/autoproj";

/// Annex metadata files, relative to the workspace root / prefix.
pub const ENV_FILE: &str = ".autoproj/env.yml";
pub const INSTALLATION_MANIFEST: &str = ".autoproj/installation-manifest";
pub const PREFIX_GEMFILE: &str = "gems/Gemfile";
pub const PREFIX_GEMFILE_LOCK: &str = "gems/Gemfile.lock";
