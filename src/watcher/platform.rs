//! Platform-specific behavior switches and path marking.

use std::ffi::OsString;
use std::path::{self, Path, PathBuf};

/// Native-watching quirks that differ per platform.
///
/// Kept as explicit flags rather than folded into one cross-platform
/// contract: rename and attribute semantics really do differ per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformQuirks {
    /// Single files cannot be watched; watch the parent directory and
    /// filter its child events instead.
    pub watch_parent_for_files: bool,
    /// Attribute changes can stand in for unlinks; re-stat the path on
    /// every `change` and report `delete` when it is gone.
    pub restat_changes: bool,
}

impl PlatformQuirks {
    /// Quirks of the platform this binary was built for.
    pub const fn current() -> Self {
        Self {
            watch_parent_for_files: cfg!(windows),
            restat_changes: cfg!(target_os = "linux"),
        }
    }

    /// No workarounds at all.
    pub const fn none() -> Self {
        Self {
            watch_parent_for_files: false,
            restat_changes: false,
        }
    }
}

impl Default for PlatformQuirks {
    fn default() -> Self {
        Self::current()
    }
}

/// True when `path` already ends with a path separator.
pub fn is_dir_marked(path: &Path) -> bool {
    path.as_os_str()
        .to_string_lossy()
        .chars()
        .last()
        .is_some_and(path::is_separator)
}

/// Append a trailing separator to directories.
///
/// The marked form is the dedup key and the path string callers see.
/// Paths that cannot be stat'ed are returned unchanged.
pub fn mark_dir(path: &Path) -> PathBuf {
    if is_dir_marked(path) {
        return path.to_path_buf();
    }

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            let mut marked = OsString::from(path.as_os_str());
            marked.push(path::MAIN_SEPARATOR_STR);
            PathBuf::from(marked)
        }
        _ => path.to_path_buf(),
    }
}
