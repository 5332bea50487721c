//! Event vocabulary shared by the native layer, the handle watchers and callers.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Opaque identifier for one native watch registration.
///
/// Unique among live watches; a released handle may be handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatchHandle(pub u64);

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kinds of event a native source can report for a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawEventKind {
    Change,
    Rename,
    Delete,
    Unknown,
    ChildRename,
    ChildDelete,
    ChildChange,
    ChildCreate,
}

impl RawEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RawEventKind::Change => "change",
            RawEventKind::Rename => "rename",
            RawEventKind::Delete => "delete",
            RawEventKind::Unknown => "unknown",
            RawEventKind::ChildRename => "child-rename",
            RawEventKind::ChildDelete => "child-delete",
            RawEventKind::ChildChange => "child-change",
            RawEventKind::ChildCreate => "child-create",
        }
    }
}

impl fmt::Display for RawEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event as delivered by a [`NativeSource`](super::NativeSource).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawEventKind,
    pub handle: WatchHandle,
    /// New or affected path, when the source knows it.
    pub path: Option<PathBuf>,
    /// Previous path of a renamed child.
    pub old_path: Option<PathBuf>,
}

impl RawEvent {
    pub fn new(kind: RawEventKind, handle: WatchHandle) -> Self {
        Self {
            kind,
            handle,
            path: None,
            old_path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_old_path(mut self, old_path: impl Into<PathBuf>) -> Self {
        self.old_path = Some(old_path.into());
        self
    }
}

/// Normalized action reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Change,
    Rename,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Action::Change => "change",
            Action::Rename => "rename",
            Action::Delete => "delete",
        })
    }
}

/// Event handed to a `watch()` caller.
///
/// `path` is always the path the caller asked for (directory-marked);
/// `new_path` carries the destination of a rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub action: Action,
    pub path: PathBuf,
    pub new_path: Option<PathBuf>,
}

impl WatchEvent {
    pub fn new(action: Action, path: impl Into<PathBuf>) -> Self {
        Self {
            action,
            path: path.into(),
            new_path: None,
        }
    }
}

/// Process-wide strategy for new watch requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Native watching, silently demoted to polling on handle exhaustion.
    #[default]
    Auto,
    /// Native watching only; exhaustion is reported as an error.
    Watch,
    /// Stat polling only.
    Poll,
}

impl std::str::FromStr for WatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(WatchMode::Auto),
            "watch" | "native" => Ok(WatchMode::Watch),
            "poll" | "polling" => Ok(WatchMode::Poll),
            _ => Err(format!(
                "Invalid watch mode '{s}'. Valid options: auto, watch, poll"
            )),
        }
    }
}

impl fmt::Display for WatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchMode::Auto => f.write_str("auto"),
            WatchMode::Watch => f.write_str("watch"),
            WatchMode::Poll => f.write_str("poll"),
        }
    }
}
