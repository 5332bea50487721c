//! Watch command: print events for paths until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;

use crate::config::Settings;
use crate::watcher::{Multiplexer, WatchError, WatchEvent, WatchMode, Watcher};

/// One output line per event.
pub fn format_event(event: &WatchEvent) -> String {
    match &event.new_path {
        Some(new_path) => format!(
            "{:<6} {} -> {}",
            event.action,
            event.path.display(),
            new_path.display()
        ),
        None => format!("{:<6} {}", event.action, event.path.display()),
    }
}

/// Run watch command.
pub async fn run_watch(
    settings: &Settings,
    paths: Vec<PathBuf>,
    mode: Option<WatchMode>,
    interval_ms: Option<u64>,
) -> anyhow::Result<()> {
    let mut config = settings.watch.clone();
    if let Some(mode) = mode {
        config.mode = mode;
    }
    if let Some(ms) = interval_ms {
        config.poll_interval_ms = ms;
    }

    let (mux, mut dispatcher) = Multiplexer::builder()
        .config(&config)
        .spawn()
        .context("failed to start native watcher")?;

    let watchers: Arc<Mutex<Vec<Watcher>>> = Arc::new(Mutex::new(Vec::new()));
    for path in paths {
        if !path.exists() {
            eprintln!("Skipping missing path: {}", path.display());
            continue;
        }

        let ready = Arc::clone(&watchers);
        mux.watch(
            &path,
            |item: Result<WatchEvent, WatchError>| match item {
                Ok(event) => println!("{}", format_event(&event)),
                Err(e) => eprintln!("Error: {e}"),
            },
            move |watcher| {
                let kind = if watcher.is_native() { "native" } else { "polling" };
                crate::debug_event!("cli", kind, "{}", watcher.path().display());
                ready.lock().push(watcher);
            },
        );
    }

    eprintln!("Watching in {} mode. Press Ctrl-C to stop.", mux.mode());

    let mut ticker = tokio::time::interval(Duration::from_millis(config.poll_interval_ms.max(1)));
    let outcome = loop {
        tokio::select! {
            _ = ticker.tick() => mux.tick(),
            _ = tokio::signal::ctrl_c() => break Ok(()),
            result = &mut dispatcher => {
                break match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(anyhow::Error::new(e).context("native watcher failed")),
                    Err(e) => Err(anyhow::Error::new(e).context("dispatcher task panicked")),
                };
            }
        }
    };

    mux.close_all();
    crate::log_event!("cli", "stopped", "{} watchers", watchers.lock().len());
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::Action;

    #[test]
    fn test_format_plain_event() {
        let event = WatchEvent::new(Action::Change, "/w/one.js");
        assert_eq!(format_event(&event), "change /w/one.js");
    }

    #[test]
    fn test_format_rename_event() {
        let mut event = WatchEvent::new(Action::Rename, "/w/one.js");
        event.new_path = Some(PathBuf::from("/w/renamed.js"));
        assert_eq!(format_event(&event), "rename /w/one.js -> /w/renamed.js");
    }
}
