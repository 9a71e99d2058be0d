use camino::{Utf8Path, Utf8PathBuf};

/// Remote paths are always the target prefix followed by the full
/// local path. Plain textual prefix join: no normalization, and an
/// absolute local path does not replace the prefix the way
/// `Path::join` would.
pub fn prefix_join(prefix: &Utf8Path, local: &Utf8Path) -> Utf8PathBuf {
    let rel = local.as_str().trim_start_matches('/');
    prefix.join(rel)
}
