//! Per-path change notifications over native watchers with a polling fallback.
//!
//! # Architecture
//!
//! ```text
//! Multiplexer (watch / close / close_all / tick / mode)
//!   |                         \
//!   | PathWatcher per call     PollWatcher (StatPoller, tick driven)
//!   |
//! HandleWatcher per resolved path   <- Dispatcher <- NativeSource (notify)
//!   (shared, rename state machine)       registry lookup by WatchHandle
//! ```
//!
//! Raw native events (`change`, `rename`, `delete`, `child-*`) are
//! normalized into three caller-visible actions: `change`, `rename` and
//! `delete`.

mod dispatch;
mod error;
mod event;
mod handle_watcher;
mod multiplexer;
mod native;
mod path_watcher;
mod platform;
mod polling;
mod registry;

pub use dispatch::Dispatcher;
pub use error::WatchError;
pub use event::{Action, RawEvent, RawEventKind, WatchEvent, WatchHandle, WatchMode};
pub use handle_watcher::{HandleEvent, HandleStatus, HandleWatcher};
pub use multiplexer::{EventCallback, Multiplexer, MultiplexerBuilder, Watcher};
pub use native::{EventReceiver, EventSender, NativeSource, NotifySource, event_channel};
pub use path_watcher::PathWatcher;
pub use platform::{PlatformQuirks, is_dir_marked, mark_dir};
pub use polling::{PollCallback, PollWatcher, PollingFallback, StatPoller};
pub use registry::HandleRegistry;
