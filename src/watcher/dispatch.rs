//! Shared watcher core and the raw event dispatcher.
//!
//! All native events funnel through [`WatchCore::dispatch`], which looks the
//! handle up in the registry and hands the event to its watcher
//! synchronously, so handlers run in native arrival order.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::error::WatchError;
use super::event::RawEvent;
use super::handle_watcher::HandleWatcher;
use super::native::{EventReceiver, NativeSource};
use super::registry::HandleRegistry;

/// State shared by the multiplexer, its handle watchers and the dispatcher.
pub(crate) struct WatchCore {
    pub(crate) source: Mutex<Box<dyn NativeSource>>,
    pub(crate) registry: Mutex<HandleRegistry<Arc<HandleWatcher>>>,
    /// Watchers whose handle was released by a rename and not yet re-armed.
    pub(crate) settling: Mutex<Vec<Arc<HandleWatcher>>>,
    /// Serializes find-or-create of handle watchers.
    pub(crate) attach: Mutex<()>,
    pub(crate) runtime: tokio::runtime::Handle,
    pub(crate) rename_settle: Duration,
}

impl WatchCore {
    pub(crate) fn new(
        source: Box<dyn NativeSource>,
        runtime: tokio::runtime::Handle,
        rename_settle: Duration,
    ) -> Self {
        Self {
            source: Mutex::new(source),
            registry: Mutex::new(HandleRegistry::new()),
            settling: Mutex::new(Vec::new()),
            attach: Mutex::new(()),
            runtime,
            rename_settle,
        }
    }

    /// Route one raw event to the watcher registered for its handle.
    ///
    /// Events for handles nobody owns any more are dropped.
    pub(crate) fn dispatch(self: &Arc<Self>, raw: RawEvent) -> Result<(), WatchError> {
        let watcher = self.registry.lock().get(raw.handle).cloned();
        match watcher {
            Some(watcher) => watcher.on_event(self, raw),
            None => {
                crate::debug_event!("dispatch", "stale handle", "{} {}", raw.handle, raw.kind);
                Ok(())
            }
        }
    }

    /// Linear scan for the live watcher on `path`, settling ones included.
    pub(crate) fn find_watcher(&self, path: &Path) -> Option<Arc<HandleWatcher>> {
        let registered = self
            .registry
            .lock()
            .find(|w| w.is_watching(path))
            .cloned();
        registered.or_else(|| {
            self.settling
                .lock()
                .iter()
                .find(|w| w.is_watching(path))
                .cloned()
        })
    }

    pub(crate) fn track_settling(&self, watcher: &Arc<HandleWatcher>) {
        let mut settling = self.settling.lock();
        if !settling.iter().any(|w| Arc::ptr_eq(w, watcher)) {
            settling.push(Arc::clone(watcher));
        }
    }

    pub(crate) fn forget_settling(&self, watcher: &HandleWatcher) {
        self.settling
            .lock()
            .retain(|w| !std::ptr::eq(Arc::as_ptr(w), watcher));
    }

    /// Close every registered or settling watcher and empty the registry.
    pub(crate) fn close_all(&self) {
        let mut watchers = self.registry.lock().values().into_iter().cloned().collect::<Vec<_>>();
        watchers.extend(self.settling.lock().drain(..));
        for watcher in &watchers {
            watcher.close(self);
        }
        self.registry.lock().clear();
    }

    /// Close the watcher registered for `path`, if any.
    pub(crate) fn close_path(&self, path: &Path) -> bool {
        match self.find_watcher(path) {
            Some(watcher) => {
                watcher.close(self);
                true
            }
            None => false,
        }
    }

    pub(crate) fn watched_paths(&self) -> Vec<std::path::PathBuf> {
        self.registry
            .lock()
            .values()
            .into_iter()
            .map(|w| w.path())
            .collect()
    }
}

/// Drains the native event channel into the core.
///
/// Run it on the same runtime as the multiplexer:
/// `tokio::spawn(dispatcher.run())`.
pub struct Dispatcher {
    core: Arc<WatchCore>,
    events: EventReceiver,
}

impl Dispatcher {
    pub(crate) fn new(core: Arc<WatchCore>, events: EventReceiver) -> Self {
        Self { core, events }
    }

    /// Process events until the source goes away.
    ///
    /// An unknown native event has no normalization policy and stops the
    /// loop with [`WatchError::UnknownEvent`].
    pub async fn run(mut self) -> Result<(), WatchError> {
        crate::debug_event!("dispatch", "started");

        while let Some(raw) = self.events.recv().await {
            if let Err(e) = self.core.dispatch(raw) {
                tracing::error!("[dispatch] {e}");
                return Err(e);
            }
        }

        crate::debug_event!("dispatch", "source closed");
        Ok(())
    }
}
