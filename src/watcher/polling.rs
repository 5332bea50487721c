//! Stat-polling fallback used when native watching is off or exhausted.
//!
//! Polling is tick-driven: nothing happens until the owner calls
//! [`PollingFallback::tick`]. Each tick re-stats every watched path and
//! compares it to the previous snapshot.

use std::collections::{BTreeSet, HashMap};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use super::event::Action;

pub type PollCallback = Arc<dyn Fn(Action) + Send + Sync>;

/// Polling capability consumed by the multiplexer.
pub trait PollingFallback: Send + Sync {
    /// Start polling `path`; `on_event` fires from [`tick`](Self::tick).
    ///
    /// Returns a subscription id for [`unsubscribe`](Self::unsubscribe).
    fn start(&self, path: &Path, on_event: PollCallback) -> u64;

    /// Drop one subscription; the path stops being polled with its last one.
    fn unsubscribe(&self, path: &Path, id: u64);

    /// Stop every subscription on `path`.
    fn stop(&self, path: &Path);

    fn stop_all(&self);

    fn watched_paths(&self) -> Vec<PathBuf>;

    /// Advance one polling cycle.
    fn tick(&self);
}

/// What a single stat of a path looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Snapshot {
    is_dir: bool,
    len: u64,
    modified: Option<SystemTime>,
    /// Child names, for directories only.
    children: Option<BTreeSet<OsString>>,
}

impl Snapshot {
    fn take(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        let children = if meta.is_dir() {
            std::fs::read_dir(path).ok().map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|entry| entry.file_name())
                    .collect()
            })
        } else {
            None
        };

        Some(Self {
            is_dir: meta.is_dir(),
            len: meta.len(),
            modified: meta.modified().ok(),
            children,
        })
    }
}

struct PollEntry {
    snapshot: Option<Snapshot>,
    callbacks: Vec<(u64, PollCallback)>,
}

impl PollEntry {
    fn callbacks(&self) -> Vec<PollCallback> {
        self.callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }
}

#[derive(Default)]
struct PollState {
    entries: HashMap<PathBuf, PollEntry>,
    next_id: u64,
}

/// [`PollingFallback`] that diffs `stat` results between ticks.
#[derive(Default)]
pub struct StatPoller {
    state: Mutex<PollState>,
}

impl fmt::Debug for StatPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatPoller")
            .field("paths", &self.watched_paths())
            .finish()
    }
}

impl StatPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of polled paths.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}

impl PollingFallback for StatPoller {
    fn start(&self, path: &Path, on_event: PollCallback) -> u64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state
            .entries
            .entry(path.to_path_buf())
            .or_insert_with(|| PollEntry {
                snapshot: Snapshot::take(path),
                callbacks: Vec::new(),
            })
            .callbacks
            .push((id, on_event));
        crate::debug_event!("poll", "watching", "{} (subscription {id})", path.display());
        id
    }

    fn unsubscribe(&self, path: &Path, id: u64) {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(path) else {
            return;
        };
        entry.callbacks.retain(|(sid, _)| *sid != id);
        if entry.callbacks.is_empty() {
            state.entries.remove(path);
            crate::debug_event!("poll", "stopped", "{}", path.display());
        }
    }

    fn stop(&self, path: &Path) {
        if self.state.lock().entries.remove(path).is_some() {
            crate::debug_event!("poll", "stopped", "{}", path.display());
        }
    }

    fn stop_all(&self) {
        self.state.lock().entries.clear();
    }

    fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.state.lock().entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn tick(&self) {
        let mut fired: Vec<(Action, Vec<PollCallback>)> = Vec::new();

        {
            let mut state = self.state.lock();
            let mut gone = Vec::new();

            for (path, entry) in state.entries.iter_mut() {
                let current = Snapshot::take(path);
                if current.is_none() {
                    if entry.snapshot.is_some() {
                        fired.push((Action::Delete, entry.callbacks()));
                        gone.push(path.clone());
                    }
                } else if current != entry.snapshot {
                    fired.push((Action::Change, entry.callbacks()));
                    entry.snapshot = current;
                }
            }

            for path in gone {
                state.entries.remove(&path);
            }
        }

        for (action, callbacks) in fired {
            for callback in callbacks {
                callback(action);
            }
        }
    }
}

/// Polling subscription handed to `watch()` callers.
#[derive(Clone)]
pub struct PollWatcher {
    path: PathBuf,
    subscription: u64,
    poller: Arc<dyn PollingFallback>,
}

impl fmt::Debug for PollWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollWatcher").field("path", &self.path).finish()
    }
}

impl PollWatcher {
    pub(crate) fn start(poller: &Arc<dyn PollingFallback>, path: PathBuf, on_event: PollCallback) -> Self {
        let subscription = poller.start(&path, on_event);
        Self {
            path,
            subscription,
            poller: Arc::clone(poller),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop this subscription; other subscribers on the path keep polling.
    /// Idempotent.
    pub fn close(&self) {
        self.poller.unsubscribe(&self.path, self.subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn recorder() -> (PollCallback, Arc<Mutex<Vec<Action>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (Arc::new(move |action| sink.lock().push(action)), seen)
    }

    #[test]
    fn test_tick_without_changes_is_silent() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("one.js");
        fs::write(&file, "var one = true;").unwrap();

        let poller = StatPoller::new();
        let (callback, seen) = recorder();
        poller.start(&file, callback);

        poller.tick();
        poller.tick();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_content_change_fires_once() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("one.js");
        fs::write(&file, "var one = true;").unwrap();

        let poller = StatPoller::new();
        let (callback, seen) = recorder();
        poller.start(&file, callback);

        fs::write(&file, "var one = false; // longer").unwrap();
        poller.tick();
        poller.tick();

        assert_eq!(*seen.lock(), vec![Action::Change]);
    }

    #[test]
    fn test_delete_fires_and_stops_polling() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("added.js");
        fs::write(&file, "var added = true;").unwrap();

        let poller = StatPoller::new();
        let (callback, seen) = recorder();
        poller.start(&file, callback);

        fs::remove_file(&file).unwrap();
        poller.tick();
        poller.tick();

        assert_eq!(*seen.lock(), vec![Action::Delete]);
        assert!(poller.is_empty());
    }

    #[test]
    fn test_directory_membership_change() {
        let temp = TempDir::new().unwrap();
        let poller = StatPoller::new();
        let (callback, seen) = recorder();
        poller.start(temp.path(), callback);

        fs::write(temp.path().join("new.js"), "").unwrap();
        poller.tick();

        assert_eq!(*seen.lock(), vec![Action::Change]);
    }

    #[test]
    fn test_stop_and_watched_paths() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.js");
        let b = temp.path().join("b.js");
        fs::write(&a, "").unwrap();
        fs::write(&b, "").unwrap();

        let poller: Arc<dyn PollingFallback> = Arc::new(StatPoller::new());
        let (callback, _) = recorder();
        let watcher = PollWatcher::start(&poller, a.clone(), Arc::clone(&callback));
        poller.start(&b, callback);

        assert_eq!(poller.watched_paths(), vec![a.clone(), b.clone()]);

        watcher.close();
        watcher.close();
        assert_eq!(poller.watched_paths(), vec![b]);

        poller.stop_all();
        assert!(poller.watched_paths().is_empty());
    }

    #[test]
    fn test_unsubscribe_keeps_other_subscribers() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("one.js");
        fs::write(&file, "a").unwrap();

        let poller: Arc<dyn PollingFallback> = Arc::new(StatPoller::new());
        let (first_cb, first) = recorder();
        let (second_cb, second) = recorder();
        let a = PollWatcher::start(&poller, file.clone(), first_cb);
        let b = PollWatcher::start(&poller, file.clone(), second_cb);

        a.close();
        a.close();
        assert_eq!(poller.watched_paths(), vec![file.clone()]);

        fs::write(&file, "abc").unwrap();
        poller.tick();
        assert!(first.lock().is_empty());
        assert_eq!(*second.lock(), vec![Action::Change]);

        b.close();
        assert!(poller.watched_paths().is_empty());
    }

    #[test]
    fn test_callback_may_stop_poller() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("one.js");
        fs::write(&file, "a").unwrap();

        let poller = Arc::new(StatPoller::new());
        let inner = Arc::clone(&poller);
        poller.start(&file, Arc::new(move |_| inner.stop_all()));

        fs::write(&file, "abc").unwrap();
        poller.tick();
        assert!(poller.is_empty());
    }
}
