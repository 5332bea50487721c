//! Public entry point: per-path watch requests over native or polling watchers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::WatchConfig;

use super::dispatch::{Dispatcher, WatchCore};
use super::error::WatchError;
use super::event::{Action, RawEvent, WatchEvent, WatchMode};
use super::native::{EventReceiver, NativeSource, NotifySource};
use super::path_watcher::{ChangeCallback, PathWatcher};
use super::platform::{PlatformQuirks, mark_dir};
use super::polling::{PollWatcher, PollingFallback, StatPoller};

/// Callback receiving normalized events (or the reason a watch failed).
pub type EventCallback = Arc<dyn Fn(Result<WatchEvent, WatchError>) + Send + Sync>;

/// Watcher handed to the `on_ready` callback of [`Multiplexer::watch`].
#[derive(Debug)]
pub enum Watcher {
    Native(PathWatcher),
    Polling(PollWatcher),
}

impl Watcher {
    pub fn path(&self) -> PathBuf {
        match self {
            Watcher::Native(w) => w.path(),
            Watcher::Polling(w) => w.path().to_path_buf(),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Watcher::Native(_))
    }

    /// Stop watching. Idempotent.
    pub fn close(&self) {
        match self {
            Watcher::Native(w) => w.close(),
            Watcher::Polling(w) => w.close(),
        }
    }
}

#[derive(Default)]
struct GateState {
    open: bool,
    finished: bool,
    queue: Vec<Result<WatchEvent, WatchError>>,
}

impl GateState {
    /// Whether `item` may reach the caller. A delete is the last event a
    /// subscription ever delivers.
    fn admit(&mut self, item: &Result<WatchEvent, WatchError>) -> bool {
        if self.finished {
            return false;
        }
        if matches!(item, Ok(event) if event.action == Action::Delete) {
            self.finished = true;
        }
        true
    }
}

/// Holds events back until `on_ready` has run, then forwards in order.
struct Delivery {
    on_event: EventCallback,
    state: Mutex<GateState>,
}

impl Delivery {
    fn new(on_event: EventCallback) -> Self {
        Self {
            on_event,
            state: Mutex::new(GateState::default()),
        }
    }

    fn deliver(&self, item: Result<WatchEvent, WatchError>) {
        {
            let mut state = self.state.lock();
            if !state.open {
                if !state.finished {
                    state.queue.push(item);
                }
                return;
            }
            if !state.admit(&item) {
                return;
            }
        }
        (self.on_event)(item);
    }

    fn open(&self) {
        loop {
            let queued = {
                let mut state = self.state.lock();
                if state.queue.is_empty() {
                    state.open = true;
                    return;
                }
                std::mem::take(&mut state.queue)
            };

            for item in queued {
                let admitted = self.state.lock().admit(&item);
                if admitted {
                    (self.on_event)(item);
                }
            }
        }
    }
}

struct Inner {
    core: Arc<WatchCore>,
    poller: Arc<dyn PollingFallback>,
    mode: RwLock<WatchMode>,
    quirks: PlatformQuirks,
    startup_delay: Duration,
}

/// Multiplexes per-path watch requests over native handles and polling.
///
/// Cheap to clone; clones share all state. Build one with
/// [`Multiplexer::builder`] inside a tokio runtime.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

impl Multiplexer {
    pub fn builder() -> MultiplexerBuilder {
        MultiplexerBuilder::new()
    }

    pub fn mode(&self) -> WatchMode {
        *self.inner.mode.read()
    }

    /// Change the strategy used by subsequent `watch()` calls.
    pub fn set_mode(&self, mode: WatchMode) {
        *self.inner.mode.write() = mode;
    }

    pub fn quirks(&self) -> PlatformQuirks {
        self.inner.quirks
    }

    /// Watch `path`.
    ///
    /// Paths that do not exist are ignored: neither callback fires.
    /// Otherwise `on_ready` fires exactly once with the native or polling
    /// watcher, and `on_event` never fires before it. Failures to watch are
    /// reported through `on_event` instead.
    pub fn watch<E, R>(&self, path: impl AsRef<Path>, on_event: E, on_ready: R)
    where
        E: Fn(Result<WatchEvent, WatchError>) + Send + Sync + 'static,
        R: FnOnce(Watcher) + Send + 'static,
    {
        let path = path.as_ref();
        if !path.exists() {
            crate::debug_event!("watcher", "ignoring missing path", "{}", path.display());
            return;
        }

        let file = mark_dir(path);
        let on_event: EventCallback = Arc::new(on_event);

        if self.mode() == WatchMode::Poll {
            let (watcher, delivery) = self.start_polling(file, on_event);
            on_ready(watcher);
            delivery.open();
            return;
        }

        // Give a just-renamed path time to settle so two watch requests do
        // not collide on the same native handle.
        let mux = self.clone();
        let delay = self.inner.startup_delay;
        self.inner.core.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !file.exists() {
                crate::debug_event!("watcher", "path vanished before watch", "{}", file.display());
                return;
            }
            mux.attach_native(file, on_event, on_ready);
        });
    }

    fn attach_native<R>(&self, file: PathBuf, on_event: EventCallback, on_ready: R)
    where
        R: FnOnce(Watcher),
    {
        let delivery = Arc::new(Delivery::new(Arc::clone(&on_event)));
        let resolved = std::path::absolute(&file).unwrap_or_else(|_| file.clone());
        let callback = self.translator(file.clone(), Arc::clone(&delivery));

        match PathWatcher::new(&self.inner.core, resolved, self.inner.quirks, callback) {
            Ok(watcher) => {
                crate::debug_event!("watcher", "native", "{}", file.display());
                on_ready(Watcher::Native(watcher));
                delivery.open();
            }
            Err(e) if e.is_resource_exhausted() => {
                if self.mode() != WatchMode::Watch {
                    crate::log_event!("watcher", "falling back to polling", "{}", file.display());
                    let (watcher, delivery) = self.start_polling(file, on_event);
                    on_ready(watcher);
                    delivery.open();
                } else {
                    tracing::warn!("[watcher] native handles exhausted for {}", file.display());
                    on_event(Err(WatchError::TooManyOpenFiles { path: file }));
                }
            }
            Err(e) => {
                tracing::warn!("[watcher] failed to watch {}: {e}", file.display());
                on_event(Err(e));
            }
        }
    }

    /// Wrap a native subscription so callers always see the path they asked for.
    fn translator(&self, file: PathBuf, delivery: Arc<Delivery>) -> ChangeCallback {
        let restat = self.inner.quirks.restat_changes;
        Arc::new(move |action, new_path| {
            // attribute events can stand in for an unlink
            let action = if restat
                && action == Action::Change
                && std::fs::symlink_metadata(&file).is_err()
            {
                Action::Delete
            } else {
                action
            };
            let new_path = if action == Action::Rename { new_path } else { None };

            delivery.deliver(Ok(WatchEvent {
                action,
                path: file.clone(),
                new_path,
            }));
        })
    }

    fn start_polling(&self, file: PathBuf, on_event: EventCallback) -> (Watcher, Arc<Delivery>) {
        let delivery = Arc::new(Delivery::new(on_event));
        let sink = Arc::clone(&delivery);
        let reported = file.clone();
        let watcher = PollWatcher::start(
            &self.inner.poller,
            file,
            Arc::new(move |action| sink.deliver(Ok(WatchEvent::new(action, reported.clone())))),
        );
        (Watcher::Polling(watcher), delivery)
    }

    /// Release every native handle and every polling watch.
    pub fn close_all(&self) {
        self.inner.core.close_all();
        self.inner.poller.stop_all();
        crate::debug_event!("watcher", "closed all");
    }

    /// Release the native and polling watches on `path`.
    pub fn close(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.inner.core.close_path(path);
        self.inner.poller.stop(path);
    }

    /// Native watch paths (directories marked) followed by polled paths.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .inner
            .core
            .watched_paths()
            .iter()
            .map(|p| mark_dir(p))
            .collect();
        paths.extend(self.inner.poller.watched_paths());
        paths
    }

    /// Advance the polling fallback by one cycle.
    ///
    /// Call it at least every 500ms to reliably see directory membership
    /// changes.
    pub fn tick(&self) {
        self.inner.poller.tick();
    }

    /// Route a raw native event, as the [`Dispatcher`] does.
    pub fn dispatch(&self, raw: RawEvent) -> Result<(), WatchError> {
        self.inner.core.dispatch(raw)
    }

    /// Number of live native handle watchers.
    pub fn native_watcher_count(&self) -> usize {
        self.inner.core.registry.lock().len()
    }
}

/// Builder for a [`Multiplexer`] and its [`Dispatcher`].
pub struct MultiplexerBuilder {
    mode: WatchMode,
    startup_delay: Duration,
    rename_settle: Duration,
    quirks: PlatformQuirks,
    source: Option<(Box<dyn NativeSource>, EventReceiver)>,
    poller: Option<Arc<dyn PollingFallback>>,
}

impl MultiplexerBuilder {
    pub fn new() -> Self {
        Self::default().config(&WatchConfig::default())
    }

    /// Apply timings and mode from configuration.
    pub fn config(mut self, config: &WatchConfig) -> Self {
        self.mode = config.mode;
        self.startup_delay = Duration::from_millis(config.startup_delay_ms);
        self.rename_settle = Duration::from_millis(config.rename_settle_ms);
        self
    }

    pub fn mode(mut self, mode: WatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Set the rename disambiguation window.
    pub fn rename_settle(mut self, settle: Duration) -> Self {
        self.rename_settle = settle;
        self
    }

    pub fn quirks(mut self, quirks: PlatformQuirks) -> Self {
        self.quirks = quirks;
        self
    }

    /// Use a custom native source whose events arrive on `events`.
    pub fn native_source(mut self, source: impl NativeSource + 'static, events: EventReceiver) -> Self {
        self.source = Some((Box::new(source), events));
        self
    }

    pub fn poller(mut self, poller: impl PollingFallback + 'static) -> Self {
        self.poller = Some(Arc::new(poller));
        self
    }

    /// Build the multiplexer. Must run inside a tokio runtime.
    pub fn build(self) -> Result<(Multiplexer, Dispatcher), WatchError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| WatchError::NoRuntime)?;

        let (source, events) = match self.source {
            Some(source) => source,
            None => {
                let (source, events) = NotifySource::new()?;
                (Box::new(source) as Box<dyn NativeSource>, events)
            }
        };
        crate::debug_event!("watcher", "native backend", "{}", source.backend_name());

        let core = Arc::new(WatchCore::new(source, runtime, self.rename_settle));
        let poller = self
            .poller
            .unwrap_or_else(|| Arc::new(StatPoller::new()) as Arc<dyn PollingFallback>);

        let multiplexer = Multiplexer {
            inner: Arc::new(Inner {
                core: Arc::clone(&core),
                poller,
                mode: RwLock::new(self.mode),
                quirks: self.quirks,
                startup_delay: self.startup_delay,
            }),
        };

        Ok((multiplexer, Dispatcher::new(core, events)))
    }

    /// Build and spawn the dispatcher on the current runtime.
    pub fn spawn(self) -> Result<(Multiplexer, JoinHandle<Result<(), WatchError>>), WatchError> {
        let (multiplexer, dispatcher) = self.build()?;
        let task = multiplexer.inner.core.runtime.spawn(dispatcher.run());
        Ok((multiplexer, task))
    }
}

impl Default for MultiplexerBuilder {
    fn default() -> Self {
        Self {
            mode: WatchMode::Auto,
            startup_delay: Duration::ZERO,
            rename_settle: Duration::ZERO,
            quirks: PlatformQuirks::current(),
            source: None,
            poller: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (EventCallback, Arc<Mutex<Vec<Action>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: EventCallback = Arc::new(move |item: Result<WatchEvent, WatchError>| {
            if let Ok(event) = item {
                sink.lock().push(event.action);
            }
        });
        (callback, seen)
    }

    #[test]
    fn test_delivery_queues_until_open() {
        let (callback, seen) = recorder();
        let delivery = Delivery::new(callback);

        delivery.deliver(Ok(WatchEvent::new(Action::Change, "/w/one.js")));
        assert!(seen.lock().is_empty());

        delivery.open();
        delivery.deliver(Ok(WatchEvent::new(Action::Rename, "/w/one.js")));

        assert_eq!(*seen.lock(), vec![Action::Change, Action::Rename]);
    }

    #[test]
    fn test_delivery_stops_after_delete() {
        let (callback, seen) = recorder();
        let delivery = Delivery::new(callback);
        delivery.open();

        delivery.deliver(Ok(WatchEvent::new(Action::Delete, "/w/added.js")));
        delivery.deliver(Ok(WatchEvent::new(Action::Delete, "/w/added.js")));
        delivery.deliver(Ok(WatchEvent::new(Action::Change, "/w/added.js")));

        assert_eq!(*seen.lock(), vec![Action::Delete]);
    }

    #[test]
    fn test_delivery_drops_queued_events_after_queued_delete() {
        let (callback, seen) = recorder();
        let delivery = Delivery::new(callback);

        delivery.deliver(Ok(WatchEvent::new(Action::Delete, "/w/added.js")));
        delivery.deliver(Ok(WatchEvent::new(Action::Change, "/w/added.js")));
        delivery.open();

        assert_eq!(*seen.lock(), vec![Action::Delete]);
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = Multiplexer::builder().build();
        assert!(matches!(result, Err(WatchError::NoRuntime)));
    }
}
