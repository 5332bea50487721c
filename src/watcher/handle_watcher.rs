//! Handle watcher: one live native handle fanned out to many subscribers.
//!
//! Also home of the rename state machine. The native layer reports a
//! rename as one ambiguous signal ("moved away" or "atomically replaced"),
//! so the watcher drops its handle, waits for the settle window and
//! decides by checking whether the original path still exists.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::dispatch::WatchCore;
use super::error::WatchError;
use super::event::{RawEvent, RawEventKind, WatchHandle};

/// Event republished by a [`HandleWatcher`] to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleEvent {
    pub kind: RawEventKind,
    pub path: Option<PathBuf>,
    pub old_path: Option<PathBuf>,
}

impl HandleEvent {
    pub fn new(kind: RawEventKind) -> Self {
        Self {
            kind,
            path: None,
            old_path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

pub(crate) type Subscriber = Arc<dyn Fn(&HandleEvent) + Send + Sync>;

/// Lifecycle of a handle watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    /// Holds a live, registered native handle.
    Active,
    /// Handle released after a raw rename; disambiguation pending.
    Settling,
    /// Terminal.
    Closed,
}

struct HandleState {
    handle: Option<WatchHandle>,
    path: PathBuf,
    status: HandleStatus,
    subscribers: Vec<(u64, Subscriber)>,
    next_subscriber: u64,
}

pub struct HandleWatcher {
    state: Mutex<HandleState>,
}

impl fmt::Debug for HandleWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HandleWatcher")
            .field("handle", &state.handle)
            .field("path", &state.path)
            .field("status", &state.status)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl HandleWatcher {
    /// Watch `path` natively and register the new watcher with the core.
    pub(crate) fn start(core: &Arc<WatchCore>, path: PathBuf) -> Result<Arc<Self>, WatchError> {
        let watcher = Arc::new(Self {
            state: Mutex::new(HandleState {
                handle: None,
                path,
                status: HandleStatus::Settling,
                subscribers: Vec::new(),
                next_subscriber: 1,
            }),
        });
        watcher.arm(core)?;
        Ok(watcher)
    }

    pub fn path(&self) -> PathBuf {
        self.state.lock().path.clone()
    }

    pub fn handle(&self) -> Option<WatchHandle> {
        self.state.lock().handle
    }

    pub fn status(&self) -> HandleStatus {
        self.state.lock().status
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub(crate) fn is_watching(&self, path: &Path) -> bool {
        let state = self.state.lock();
        state.status != HandleStatus::Closed && state.path == path
    }

    /// Add a subscriber unless the watcher is already closed.
    pub(crate) fn try_subscribe(&self, subscriber: Subscriber) -> Option<u64> {
        let mut state = self.state.lock();
        if state.status == HandleStatus::Closed {
            return None;
        }
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.push((id, subscriber));
        Some(id)
    }

    pub(crate) fn unsubscribe(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|(sid, _)| *sid != id);
        state.subscribers.len() != before
    }

    /// Publish to every current subscriber, outside the state lock.
    fn emit(&self, event: &HandleEvent) {
        let subscribers: Vec<Subscriber> = self
            .state
            .lock()
            .subscribers
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();

        for subscriber in subscribers {
            subscriber(event);
        }
    }

    /// Acquire a fresh native handle for the current path and register it.
    ///
    /// Returns `false` when the watcher was closed meanwhile; the new handle
    /// is released again and nothing is registered.
    fn arm(self: &Arc<Self>, core: &Arc<WatchCore>) -> Result<bool, WatchError> {
        let path = self.path();
        let handle = core.source.lock().watch(&path)?;

        let displaced = {
            let mut registry = core.registry.lock();
            let mut state = self.state.lock();
            if state.status == HandleStatus::Closed {
                drop(state);
                drop(registry);
                core.source.lock().unwatch(handle);
                core.forget_settling(self);
                return Ok(false);
            }
            state.handle = Some(handle);
            state.status = HandleStatus::Active;
            drop(state);
            registry.add(handle, Arc::clone(self))
        };
        core.forget_settling(self);

        if let Some(previous) = displaced {
            if !Arc::ptr_eq(&previous, self) {
                tracing::warn!(
                    "[handle] {handle} for {} was still held by a watcher on {}; retiring it",
                    path.display(),
                    previous.path().display()
                );
                previous.retire();
            }
        }

        Ok(true)
    }

    /// Close without releasing the handle, which now belongs to another watcher.
    fn retire(&self) {
        let mut state = self.state.lock();
        state.status = HandleStatus::Closed;
        state.handle = None;
    }

    /// Move to `status`, deregister and release the native handle.
    ///
    /// A closed watcher stays closed.
    fn release(&self, core: &WatchCore, status: HandleStatus) {
        let handle = {
            let mut state = self.state.lock();
            if state.status == HandleStatus::Closed {
                return;
            }
            state.status = status;
            state.handle.take()
        };

        if status == HandleStatus::Closed {
            core.forget_settling(self);
        }

        let Some(handle) = handle else {
            return;
        };

        {
            let mut registry = core.registry.lock();
            if registry
                .get(handle)
                .is_some_and(|w| std::ptr::eq(Arc::as_ptr(w), self))
            {
                registry.remove(handle);
            }
        }
        core.source.lock().unwatch(handle);
    }

    /// Release the handle and deregister. Idempotent.
    pub(crate) fn close(&self, core: &WatchCore) {
        self.release(core, HandleStatus::Closed);
    }

    /// Close once the last subscriber has detached.
    pub(crate) fn close_if_no_listener(&self, core: &WatchCore) {
        if self.listener_count() == 0 {
            crate::debug_event!("handle", "no listeners left", "{}", self.path().display());
            self.close(core);
        }
    }

    /// Handle one raw event routed here by the dispatcher.
    pub(crate) fn on_event(
        self: &Arc<Self>,
        core: &Arc<WatchCore>,
        raw: RawEvent,
    ) -> Result<(), WatchError> {
        match raw.kind {
            RawEventKind::Rename => {
                if self.status() != HandleStatus::Active {
                    return Ok(());
                }
                // reachable by close_all and find_watcher while unregistered
                core.track_settling(self);
                self.release(core, HandleStatus::Settling);

                let watcher = Arc::clone(self);
                let task_core = Arc::clone(core);
                let settle = core.rename_settle;
                core.runtime.spawn(async move {
                    tokio::time::sleep(settle).await;
                    watcher.settle_rename(&task_core, raw.path).await;
                });
                Ok(())
            }
            RawEventKind::Delete => {
                self.emit(&HandleEvent::new(RawEventKind::Delete));
                self.close(core);
                Ok(())
            }
            RawEventKind::Unknown => Err(WatchError::UnknownEvent { path: self.path() }),
            kind => {
                self.emit(&HandleEvent {
                    kind,
                    path: raw.path,
                    old_path: raw.old_path,
                });
                Ok(())
            }
        }
    }

    /// Decide what a raw rename meant once the settle window has passed.
    async fn settle_rename(self: &Arc<Self>, core: &Arc<WatchCore>, new_path: Option<PathBuf>) {
        if self.status() == HandleStatus::Closed {
            crate::debug_event!("handle", "closed while settling", "{}", self.path().display());
            core.forget_settling(self);
            return;
        }

        let original = self.path();
        let still_exists = tokio::fs::metadata(&original).await.is_ok();

        if self.status() == HandleStatus::Closed {
            core.forget_settling(self);
            return;
        }

        if still_exists {
            crate::debug_event!("handle", "replaced in place", "{}", original.display());
            if self.rearm(core) {
                self.emit(&HandleEvent::new(RawEventKind::Change));
            }
            return;
        }

        match new_path {
            Some(new_path) => {
                crate::debug_event!(
                    "handle",
                    "renamed",
                    "{} -> {}",
                    original.display(),
                    new_path.display()
                );
                self.state.lock().path = new_path.clone();
                if self.rearm(core) {
                    self.emit(&HandleEvent::new(RawEventKind::Rename).with_path(new_path));
                }
            }
            None => {
                crate::debug_event!("handle", "moved to unknown destination", "{}", original.display());
                self.emit(&HandleEvent::new(RawEventKind::Delete));
                self.close(core);
            }
        }
    }

    /// Re-watch after a rename. `false` means the watcher was closed
    /// during the settle window and must stay silent.
    fn rearm(self: &Arc<Self>, core: &Arc<WatchCore>) -> bool {
        match self.arm(core) {
            Ok(armed) => armed,
            Err(e) => {
                tracing::warn!("[handle] failed to re-watch {}: {e}", self.path().display());
                self.release(core, HandleStatus::Closed);
                true
            }
        }
    }
}
