//! Native event source: the OS-level watch/unwatch capability.
//!
//! A [`NativeSource`] hands out one [`WatchHandle`] per watched path and
//! reports raw events for those handles on a channel. The default
//! implementation, [`NotifySource`], sits on `notify::RecommendedWatcher`
//! (inotify, FSEvents, ReadDirectoryChangesW) with non-recursive watches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::error::WatchError;
use super::event::{RawEvent, RawEventKind, WatchHandle};

/// Sending half of the raw event channel.
pub type EventSender = mpsc::UnboundedSender<RawEvent>;

/// Receiving half of the raw event channel, drained by the dispatcher.
pub type EventReceiver = mpsc::UnboundedReceiver<RawEvent>;

/// Create the raw event channel used between a native source and the dispatcher.
///
/// Unbounded, so the notify thread never blocks on a send while the
/// dispatcher is inside `unwatch`.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// OS-level watch capability consumed by the multiplexer.
pub trait NativeSource: Send {
    /// Start watching `path`.
    ///
    /// Fails with [`WatchError::TooManyOpenFiles`] when the OS has no
    /// watch handles left.
    fn watch(&mut self, path: &Path) -> Result<WatchHandle, WatchError>;

    /// Release a handle. Unknown handles are ignored.
    fn unwatch(&mut self, handle: WatchHandle);

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str {
        "native"
    }
}

/// Path bookkeeping shared between the source and the notify callback thread.
#[derive(Debug, Default)]
struct WatchTable {
    by_path: HashMap<PathBuf, WatchHandle>,
    by_handle: HashMap<WatchHandle, PathBuf>,
}

impl WatchTable {
    fn handle_for(&self, path: &Path) -> Option<WatchHandle> {
        self.by_path.get(path).copied()
    }

    fn parent_handle(&self, path: &Path) -> Option<WatchHandle> {
        path.parent().and_then(|parent| self.handle_for(parent))
    }

    /// Translate one notify event into raw events for every affected handle.
    fn translate(&self, event: &Event) -> Vec<RawEvent> {
        let mut out = Vec::new();

        if matches!(event.kind, EventKind::Access(_)) {
            return out;
        }

        if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
            if let [from, to, ..] = event.paths.as_slice() {
                if let Some(handle) = self.handle_for(from) {
                    out.push(RawEvent::new(RawEventKind::Rename, handle).with_path(to));
                }
                let from_parent = self.parent_handle(from);
                if let Some(handle) = from_parent {
                    out.push(
                        RawEvent::new(RawEventKind::ChildRename, handle)
                            .with_path(to)
                            .with_old_path(from),
                    );
                }
                if let Some(handle) = self.parent_handle(to) {
                    if Some(handle) != from_parent {
                        out.push(RawEvent::new(RawEventKind::ChildCreate, handle).with_path(to));
                    }
                }
                return out;
            }
        }

        for path in &event.paths {
            if let Some(handle) = self.handle_for(path) {
                let kind = direct_kind(&event.kind);
                let raw = RawEvent::new(kind, handle);
                out.push(match kind {
                    // destination unknown for a one-sided rename
                    RawEventKind::Rename => raw,
                    _ => raw.with_path(path),
                });
            }
            if let Some(handle) = self.parent_handle(path) {
                if let Some(kind) = child_kind(&event.kind) {
                    out.push(RawEvent::new(kind, handle).with_path(path));
                }
            }
        }

        out
    }
}

fn direct_kind(kind: &EventKind) -> RawEventKind {
    match kind {
        EventKind::Modify(ModifyKind::Name(_)) => RawEventKind::Rename,
        EventKind::Create(_) | EventKind::Modify(_) => RawEventKind::Change,
        EventKind::Remove(_) => RawEventKind::Delete,
        EventKind::Any | EventKind::Other | EventKind::Access(_) => RawEventKind::Unknown,
    }
}

fn child_kind(kind: &EventKind) -> Option<RawEventKind> {
    match kind {
        EventKind::Create(_) => Some(RawEventKind::ChildCreate),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(RawEventKind::ChildCreate),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(RawEventKind::ChildDelete),
        EventKind::Modify(_) => Some(RawEventKind::ChildChange),
        EventKind::Remove(_) => Some(RawEventKind::ChildDelete),
        EventKind::Any | EventKind::Other | EventKind::Access(_) => None,
    }
}

/// [`NativeSource`] backed by `notify::RecommendedWatcher`.
pub struct NotifySource {
    watcher: notify::RecommendedWatcher,
    table: Arc<Mutex<WatchTable>>,
    next_handle: u64,
}

impl NotifySource {
    /// Create the source and the channel its events arrive on.
    pub fn new() -> Result<(Self, EventReceiver), WatchError> {
        let (tx, rx) = event_channel();
        let table = Arc::new(Mutex::new(WatchTable::default()));
        let callback_table = Arc::clone(&table);

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let raw_events = callback_table.lock().translate(&event);
                for raw in raw_events {
                    if tx.send(raw).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("[native] file watch error: {e}");
            }
        })?;

        Ok((
            Self {
                watcher,
                table,
                next_handle: 1,
            },
            rx,
        ))
    }

    /// Number of live native registrations.
    pub fn watch_count(&self) -> usize {
        self.table.lock().by_handle.len()
    }
}

impl NativeSource for NotifySource {
    fn watch(&mut self, path: &Path) -> Result<WatchHandle, WatchError> {
        if let Some(handle) = self.table.lock().handle_for(path) {
            return Ok(handle);
        }

        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::from_notify(path, e))?;

        let handle = WatchHandle(self.next_handle);
        self.next_handle += 1;

        let mut table = self.table.lock();
        table.by_path.insert(path.to_path_buf(), handle);
        table.by_handle.insert(handle, path.to_path_buf());
        crate::debug_event!("native", "watching", "{} {}", handle, path.display());

        Ok(handle)
    }

    fn unwatch(&mut self, handle: WatchHandle) {
        let path = {
            let mut table = self.table.lock();
            let Some(path) = table.by_handle.remove(&handle) else {
                return;
            };
            table.by_path.remove(&path);
            path
        };

        if let Err(e) = self.watcher.unwatch(&path) {
            crate::debug_event!("native", "unwatch failed", "{}: {e}", path.display());
        }
    }

    fn backend_name(&self) -> &'static str {
        "notify"
    }
}
