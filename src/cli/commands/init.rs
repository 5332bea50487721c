//! Init and Config commands.

use std::path::Path;

use anyhow::Context;

use crate::config::{Settings, WatchConfig};

/// One-line summary of the watch settings, as shown after `init`.
pub fn describe_watch(watch: &WatchConfig) -> String {
    format!(
        "mode {}, first watch after {}ms, rename settle {}ms, poll every {}ms",
        watch.mode, watch.startup_delay_ms, watch.rename_settle_ms, watch.poll_interval_ms
    )
}

/// Write `.pathmux/settings.toml` and report what it contains.
pub fn run_init(force: bool) -> anyhow::Result<()> {
    let path = Settings::init_config_file(force).context("cannot create configuration")?;

    // read back through the full layering so env overrides show up too
    let written = Settings::load_from(&path).context("cannot read configuration back")?;
    println!("Created configuration file at: {}", path.display());
    println!("Watch: {}", describe_watch(&written.watch));
    println!("Log level: {}", written.logging.default);
    Ok(())
}

/// Print the active configuration as TOML.
pub fn run_config(config: &Settings, source: Option<&Path>) -> anyhow::Result<()> {
    match source {
        Some(path) => println!("Configuration from: {}", path.display()),
        None => println!("Configuration from: defaults, .pathmux/settings.toml and PATHMUX_* env"),
    }
    println!("{}", "=".repeat(50));
    let rendered = toml::to_string_pretty(config).context("cannot render configuration")?;
    println!("{rendered}");
    Ok(())
}
