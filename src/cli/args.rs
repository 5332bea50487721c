//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::watcher::WatchMode;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Per-path change notifications
#[derive(Parser)]
#[command(
    name = "pathmux",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch paths through native OS watchers with a polling fallback",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize project
    #[command(about = "Set up .pathmux directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    #[command(about = "Display active settings")]
    Config,

    /// Watch paths and print every change until interrupted
    #[command(about = "Print change, rename and delete events for paths")]
    Watch {
        /// Files or directories to watch
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,

        /// Watch mode: auto, watch or poll (overrides config)
        #[arg(short, long)]
        mode: Option<WatchMode>,

        /// Polling tick interval in milliseconds (overrides config)
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,
    },
}
