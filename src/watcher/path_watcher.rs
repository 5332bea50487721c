//! Path watcher: a caller's subscription to one logical path.
//!
//! Several path watchers on the same resolved watch path share a single
//! [`HandleWatcher`]. Where files cannot be watched directly the path
//! watcher binds to the parent directory and narrows its child events
//! down to the one file it tracks.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::dispatch::WatchCore;
use super::error::WatchError;
use super::event::{Action, RawEventKind};
use super::handle_watcher::{HandleEvent, HandleWatcher};
use super::platform::PlatformQuirks;

pub(crate) type ChangeCallback = Arc<dyn Fn(Action, Option<PathBuf>) + Send + Sync>;

/// Translates handle-level events into this watcher's own actions.
struct EventFilter {
    tracked: Arc<Mutex<PathBuf>>,
    is_watching_parent: bool,
    callback: ChangeCallback,
}

impl EventFilter {
    fn is_tracked(&self, path: Option<&Path>) -> bool {
        path.is_some_and(|p| *self.tracked.lock() == p)
    }

    fn apply(&self, event: &HandleEvent) {
        match event.kind {
            RawEventKind::Rename => {
                if let Some(new_path) = &event.path {
                    *self.tracked.lock() = new_path.clone();
                }
                (self.callback)(Action::Rename, event.path.clone());
            }
            RawEventKind::Change => (self.callback)(Action::Change, event.path.clone()),
            RawEventKind::Delete => (self.callback)(Action::Delete, None),
            RawEventKind::ChildRename => {
                if self.is_watching_parent && self.is_tracked(event.old_path.as_deref()) {
                    self.apply(&HandleEvent {
                        kind: RawEventKind::Rename,
                        path: event.path.clone(),
                        old_path: None,
                    });
                }
            }
            RawEventKind::ChildDelete => {
                if self.is_watching_parent && self.is_tracked(event.path.as_deref()) {
                    self.apply(&HandleEvent::new(RawEventKind::Delete));
                }
            }
            RawEventKind::ChildChange => {
                if self.is_watching_parent && self.is_tracked(event.path.as_deref()) {
                    self.apply(&HandleEvent::new(RawEventKind::Change));
                }
            }
            RawEventKind::ChildCreate => {
                if !self.is_watching_parent {
                    self.apply(&HandleEvent::new(RawEventKind::Change));
                }
            }
            // rejected by the handle watcher before fan-out
            RawEventKind::Unknown => {}
        }
    }
}

/// Native subscription handed to `watch()` callers.
pub struct PathWatcher {
    path: Arc<Mutex<PathBuf>>,
    is_watching_parent: bool,
    handle_watcher: Arc<HandleWatcher>,
    subscriber: u64,
    core: Arc<WatchCore>,
}

impl fmt::Debug for PathWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathWatcher")
            .field("path", &*self.path.lock())
            .field("is_watching_parent", &self.is_watching_parent)
            .field("handle_watcher", &self.handle_watcher)
            .finish()
    }
}

impl PathWatcher {
    /// Subscribe to `path`, reusing the handle watcher already bound to the
    /// resolved watch path or starting a new one.
    pub(crate) fn new(
        core: &Arc<WatchCore>,
        path: PathBuf,
        quirks: PlatformQuirks,
        callback: ChangeCallback,
    ) -> Result<Self, WatchError> {
        let is_watching_parent = quirks.watch_parent_for_files && {
            let meta = std::fs::metadata(&path).map_err(|e| WatchError::PathWatchFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            !meta.is_dir()
        };

        let watch_path = if is_watching_parent {
            match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            }
        } else {
            path.clone()
        };

        let tracked = Arc::new(Mutex::new(path));
        let filter = EventFilter {
            tracked: Arc::clone(&tracked),
            is_watching_parent,
            callback,
        };
        let subscriber: super::handle_watcher::Subscriber =
            Arc::new(move |event: &HandleEvent| filter.apply(event));

        let _attach = core.attach.lock();
        let (handle_watcher, id) = match core
            .find_watcher(&watch_path)
            .and_then(|w| w.try_subscribe(Arc::clone(&subscriber)).map(|id| (w, id)))
        {
            Some(found) => {
                crate::debug_event!("path", "sharing", "{}", watch_path.display());
                found
            }
            None => {
                let watcher = HandleWatcher::start(core, watch_path.clone())?;
                let id = watcher
                    .try_subscribe(subscriber)
                    .ok_or_else(|| WatchError::PathWatchFailed {
                        path: watch_path,
                        reason: "watcher closed before subscription".to_string(),
                    })?;
                (watcher, id)
            }
        };

        Ok(Self {
            path: tracked,
            is_watching_parent,
            handle_watcher,
            subscriber: id,
            core: Arc::clone(core),
        })
    }

    /// Currently tracked path; follows confirmed renames.
    pub fn path(&self) -> PathBuf {
        self.path.lock().clone()
    }

    pub fn is_watching_parent(&self) -> bool {
        self.is_watching_parent
    }

    /// Path of the shared handle watcher this subscription is bound to.
    pub fn watch_path(&self) -> PathBuf {
        self.handle_watcher.path()
    }

    /// Detach from the handle watcher, closing it if this was the last
    /// subscriber. Idempotent.
    pub fn close(&self) {
        self.handle_watcher.unsubscribe(self.subscriber);
        self.handle_watcher.close_if_no_listener(&self.core);
    }
}
