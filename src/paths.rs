//! Path resolution for command-line file arguments
//!
//! Paths given on the command line (`--env-file`, `--output`, `--against`)
//! may use `~` and `$VAR`; they are expanded here before use.

use std::path::PathBuf;

/// Expand `~` and environment variables in a path
///
/// A path referencing an unset variable is returned unchanged.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
