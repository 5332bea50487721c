//! Handle registry: native handle to watcher mapping.
//!
//! Owned by the multiplexer core. Handles are unique among live watches, so
//! the registry holds at most one entry per handle; entries are replaced
//! only when the native layer hands out a handle that is still registered.

use std::collections::HashMap;

use super::event::WatchHandle;

/// Mapping from live native handles to the watcher that owns each one.
#[derive(Debug)]
pub struct HandleRegistry<W> {
    entries: HashMap<WatchHandle, W>,
}

impl<W> Default for HandleRegistry<W> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<W> HandleRegistry<W> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `watcher` for `handle`, returning the entry it displaced.
    pub fn add(&mut self, handle: WatchHandle, watcher: W) -> Option<W> {
        self.entries.insert(handle, watcher)
    }

    pub fn remove(&mut self, handle: WatchHandle) -> Option<W> {
        self.entries.remove(&handle)
    }

    pub fn get(&self, handle: WatchHandle) -> Option<&W> {
        self.entries.get(&handle)
    }

    pub fn has(&self, handle: WatchHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// All registered watchers, ordered by handle.
    pub fn values(&self) -> Vec<&W> {
        let mut handles: Vec<&WatchHandle> = self.entries.keys().collect();
        handles.sort();
        handles.into_iter().map(|h| &self.entries[h]).collect()
    }

    pub fn handles(&self) -> Vec<WatchHandle> {
        let mut handles: Vec<WatchHandle> = self.entries.keys().copied().collect();
        handles.sort();
        handles
    }

    /// Linear scan for the first watcher matching `pred`, in handle order.
    pub fn find(&self, mut pred: impl FnMut(&W) -> bool) -> Option<&W> {
        self.values().into_iter().find(|w| pred(w))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<W: Clone> HandleRegistry<W> {
    /// Remove every entry, returning the watchers in handle order.
    pub fn drain(&mut self) -> Vec<W> {
        let watchers = self.values().into_iter().cloned().collect();
        self.entries.clear();
        watchers
    }
}
