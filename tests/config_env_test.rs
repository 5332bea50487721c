use pathmux::Settings;
use pathmux::watcher::WatchMode;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_env_override_with_nested_keys() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("settings.toml");
    fs::write(&config_path, "[watch]\nmode = \"watch\"\nrename_settle_ms = 250\n").unwrap();

    unsafe {
        // Use double underscore to separate nested levels
        env::set_var("PATHMUX_WATCH__MODE", "poll");
        env::set_var("PATHMUX_WATCH__POLL_INTERVAL_MS", "42");
        env::set_var("PATHMUX_LOGGING__DEFAULT", "debug");
    }

    let settings = Settings::load_from(&config_path);

    unsafe {
        // Clean up
        env::remove_var("PATHMUX_WATCH__MODE");
        env::remove_var("PATHMUX_WATCH__POLL_INTERVAL_MS");
        env::remove_var("PATHMUX_LOGGING__DEFAULT");
    }

    let settings = settings.unwrap();

    // env beats the file
    assert_eq!(settings.watch.mode, WatchMode::Poll);
    assert_eq!(settings.watch.poll_interval_ms, 42);
    assert_eq!(settings.logging.default, "debug");
    // the file beats defaults
    assert_eq!(settings.watch.rename_settle_ms, 250);
    assert_eq!(settings.watch.startup_delay_ms, 10);
}
