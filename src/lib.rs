//! Per-path change notifications multiplexed over native OS watchers,
//! with a stat-polling fallback when native handles run out.

pub mod cli;
pub mod config;
pub mod logging;
pub mod watcher;

pub use config::{LoggingConfig, Settings, WatchConfig};
pub use watcher::{
    Action, Multiplexer, MultiplexerBuilder, WatchError, WatchEvent, WatchMode, Watcher,
};
