use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::readiness::PollPolicy;
use crate::router::ConnectOptions;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct UserConfig {
    /// Tor binary to launch instead of a downloaded bundle
    pub tor: Option<PathBuf>,
    /// Use the system tor service by default
    pub use_system: Option<bool>,
    /// Never check for a newer bundle once one is installed
    pub no_update: Option<bool>,
    /// Readiness poll attempts (default 50)
    pub poll_attempts: Option<u32>,
    /// Milliseconds between readiness polls (default 100)
    pub poll_interval_ms: Option<u64>,
}

impl UserConfig {
    /// $CONNECT_TOR_CONFIG_DIR/config.toml or ~/.config/connect-tor/config.toml
    pub fn config_path() -> PathBuf {
        crate::clienv::config_dir().join("config.toml")
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading user config");

        if !path.exists() {
            tracing::trace!("Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        tracing::trace!(tor = ?config.tor, use_system = ?config.use_system, no_update = ?config.no_update, "User config loaded");
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        tracing::trace!(path = %path.display(), "Saving user config");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        tracing::trace!("User config saved");
        Ok(())
    }

    /// Connect options with file values filled in where `overrides` leaves
    /// them unset.
    pub fn connect_options(&self, overrides: ConnectOptions) -> ConnectOptions {
        ConnectOptions {
            tor: overrides.tor.or_else(|| self.tor.clone()),
            use_system: overrides.use_system || self.use_system.unwrap_or(false),
            no_update: overrides.no_update || self.no_update.unwrap_or(false),
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        let default = PollPolicy::default();
        PollPolicy {
            max_attempts: self.poll_attempts.unwrap_or(default.max_attempts),
            interval: self
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(default.interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = UserConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, UserConfig::default());
        assert_eq!(config.poll_policy(), PollPolicy::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = UserConfig {
            tor: Some(PathBuf::from("/usr/local/bin/tor")),
            no_update: Some(true),
            poll_interval_ms: Some(250),
            ..Default::default()
        };

        config.save_to(&path).unwrap();
        let loaded = UserConfig::load_from(&path).unwrap();

        assert_eq!(loaded, config);
        assert_eq!(loaded.poll_policy().interval, Duration::from_millis(250));
        assert_eq!(loaded.poll_policy().max_attempts, 50);
    }

    #[test]
    fn test_flags_override_file() {
        let config = UserConfig {
            tor: Some(PathBuf::from("/from/file")),
            use_system: Some(true),
            ..Default::default()
        };

        let merged = config.connect_options(ConnectOptions {
            tor: Some(PathBuf::from("/from/flag")),
            ..Default::default()
        });
        assert_eq!(merged.tor, Some(PathBuf::from("/from/flag")));
        assert!(merged.use_system);
        assert!(!merged.no_update);

        let merged = config.connect_options(ConnectOptions::default());
        assert_eq!(merged.tor, Some(PathBuf::from("/from/file")));
    }

    #[test]
    fn test_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "poll_attempts = \"many\"").unwrap();

        assert!(UserConfig::load_from(&path).is_err());
    }
}
