//! Configuration file support for ccloader.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (CCLOADER_*)
//! 3. Local config file (./ccloader.toml)
//! 4. Global config file (~/.config/ccloader/config.toml)
//!
//! A file given with `--config` replaces both files.

use crate::CliError;
use ccloader::{DEFAULT_BAUD, Timing};
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Session timing overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Boot countdown in seconds.
    pub countdown_secs: Option<u32>,
    /// Settle delay after the control lines change.
    pub settle_ms: Option<u64>,
    /// ChipId reply deadline.
    pub chip_id_timeout_secs: Option<u64>,
    /// FlashBlock deadline.
    pub block_timeout_secs: Option<u64>,
    /// Idle poll interval.
    pub poll_interval_ms: Option<u64>,
    /// Give up when the bridge sends no frame for this long.
    pub idle_timeout_secs: Option<u64>,
}

/// Write configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Verify by default when the command line does not say.
    pub verify: Option<bool>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Timing configuration.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Write configuration.
    #[serde(default)]
    pub write: WriteConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new("ccloader.toml")) {
            debug!("Loaded local config from ccloader.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike discovered files, an explicit file must exist and parse.
    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            CliError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ccloader").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        let timing = other.timing;
        if timing.countdown_secs.is_some() {
            self.timing.countdown_secs = timing.countdown_secs;
        }
        if timing.settle_ms.is_some() {
            self.timing.settle_ms = timing.settle_ms;
        }
        if timing.chip_id_timeout_secs.is_some() {
            self.timing.chip_id_timeout_secs = timing.chip_id_timeout_secs;
        }
        if timing.block_timeout_secs.is_some() {
            self.timing.block_timeout_secs = timing.block_timeout_secs;
        }
        if timing.poll_interval_ms.is_some() {
            self.timing.poll_interval_ms = timing.poll_interval_ms;
        }
        if timing.idle_timeout_secs.is_some() {
            self.timing.idle_timeout_secs = timing.idle_timeout_secs;
        }

        if other.write.verify.is_some() {
            self.write.verify = other.write.verify;
        }
    }

    /// Baud rate, preferring the command line (or environment) value.
    pub fn baud(&self, cli: Option<u32>) -> u32 {
        cli.or(self.connection.baud)
            .unwrap_or(DEFAULT_BAUD)
    }

    /// Session timing with file overrides and the command-line countdown applied.
    pub fn timing(&self, countdown: Option<u32>) -> Timing {
        let mut timing = Timing::default();
        let t = &self.timing;

        if let Some(secs) = countdown.or(t.countdown_secs) {
            timing = timing.with_countdown(secs);
        }
        if let Some(ms) = t.settle_ms {
            timing = timing.with_settle(Duration::from_millis(ms));
        }
        if let Some(secs) = t.chip_id_timeout_secs {
            timing = timing.with_chip_id_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = t.block_timeout_secs {
            timing = timing.with_block_timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = t.poll_interval_ms {
            timing = timing.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(secs) = t.idle_timeout_secs {
            timing = timing.with_idle_timeout(Duration::from_secs(secs));
        }
        timing
    }

    /// Default for the write verify flag.
    pub fn verify(&self) -> bool {
        self.write
            .verify
            .unwrap_or(false)
    }
}
