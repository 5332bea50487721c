//! Configuration module for the path multiplexer.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.pathmux/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `PATHMUX_` and use double
//! underscores to separate nested levels:
//! - `PATHMUX_WATCH__MODE=poll` sets `watch.mode`
//! - `PATHMUX_WATCH__RENAME_SETTLE_MS=250` sets `watch.rename_settle_ms`
//! - `PATHMUX_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::watcher::{WatchError, WatchMode};

const CONFIG_DIR: &str = ".pathmux";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "PATHMUX_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Watch strategy and timings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// Initial watch mode: auto, watch or poll
    #[serde(default)]
    pub mode: WatchMode,

    /// Delay before the first native watch attempt on a path
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,

    /// Rename disambiguation window
    #[serde(default = "default_rename_settle_ms")]
    pub rename_settle_ms: u64,

    /// How often the CLI advances the polling fallback
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for all modules
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `pathmux::watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_startup_delay_ms() -> u64 {
    10
}
fn default_rename_settle_ms() -> u64 {
    100
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::Auto,
            startup_delay_ms: default_startup_delay_ms(),
            rename_settle_ms: default_rename_settle_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels; single underscores
            // stay inside field names
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
            .extract()
            .map_err(Box::new)
    }

    /// Find `.pathmux/settings.toml` from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(CONFIG_FILE));
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), WatchError> {
        let path = path.as_ref();
        let config_error = |reason: String| WatchError::ConfigError { reason };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| config_error(e.to_string()))?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| config_error(e.to_string()))?;
        std::fs::write(path, toml_string).map_err(|e| config_error(e.to_string()))?;

        Ok(())
    }

    /// Create a default settings file under the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, WatchError> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err(WatchError::ConfigError {
                reason: "Configuration file already exists. Use --force to overwrite".to_string(),
            });
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.watch.mode, WatchMode::Auto);
        assert_eq!(settings.watch.startup_delay_ms, 10);
        assert_eq!(settings.watch.rename_settle_ms, 100);
        assert_eq!(settings.watch.poll_interval_ms, 500);
        assert_eq!(settings.logging.default, "warn");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[watch]
mode = "poll"
rename_settle_ms = 250

[logging]
default = "info"

[logging.modules]
"pathmux::watcher" = "trace"
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.watch.mode, WatchMode::Poll);
        assert_eq!(settings.watch.rename_settle_ms, 250);
        // untouched values keep their defaults
        assert_eq!(settings.watch.startup_delay_ms, 10);
        assert_eq!(settings.logging.default, "info");
        assert_eq!(settings.logging.modules["pathmux::watcher"], "trace");
    }

    #[test]
    fn test_invalid_mode_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[watch]\nmode = \"sometimes\"\n").unwrap();

        assert!(Settings::load_from(&config_path).is_err());
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.watch.mode = WatchMode::Watch;
        settings.watch.poll_interval_ms = 750;

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.watch.mode, WatchMode::Watch);
        assert_eq!(loaded.watch.poll_interval_ms, 750);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_from(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.watch, WatchConfig::default());
    }
}
