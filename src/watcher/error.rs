//! Error types for the watch multiplexer.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error(
        "Too many open files.\nUnable to watch \"{}\" using native OS events.",
        path.display()
    )]
    TooManyOpenFiles { path: PathBuf },

    #[error("Cannot watch path {}: {reason}", path.display())]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Received unknown event for path: {}", path.display())]
    UnknownEvent { path: PathBuf },

    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("No tokio runtime available to schedule watcher tasks")]
    NoRuntime,

    #[error("Failed to load config: {reason}")]
    ConfigError { reason: String },
}

impl WatchError {
    /// True when the OS refused a native watch because its handle budget is spent.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, WatchError::TooManyOpenFiles { .. })
    }

    /// Classify a notify error raised while watching `path`.
    pub fn from_notify(path: &Path, err: notify::Error) -> Self {
        let exhausted = match &err.kind {
            notify::ErrorKind::MaxFilesWatch => true,
            notify::ErrorKind::Io(io) => is_exhaustion_errno(io),
            _ => false,
        };

        if exhausted {
            WatchError::TooManyOpenFiles {
                path: path.to_path_buf(),
            }
        } else {
            WatchError::PathWatchFailed {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        }
    }
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}

#[cfg(unix)]
fn is_exhaustion_errno(err: &std::io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOSPC)
    )
}

#[cfg(not(unix))]
fn is_exhaustion_errno(err: &std::io::Error) -> bool {
    // ERROR_TOO_MANY_OPEN_FILES
    err.raw_os_error() == Some(4)
}
