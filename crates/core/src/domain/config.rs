//! Configuration management for Sonority
//!
//! This module provides:
//! - The audio configuration (device preference, volumes, polling cadence)
//! - TOML serialization with validation on load
//! - A config manager that falls back to defaults on a missing or corrupt file

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Default maximum number of simultaneously playing channels per sample
pub const DEFAULT_SAMPLE_CONCURRENCY: usize = 2;

fn default_volume() -> f64 {
    1.0
}

fn default_concurrency() -> usize {
    DEFAULT_SAMPLE_CONCURRENCY
}

fn default_extensions() -> Vec<String> {
    vec!["wav".to_string(), "ogg".to_string()]
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Audio subsystem configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Preferred output device name (empty = OS default)
    #[serde(default)]
    pub preferred_device: String,

    /// Volume of all tracks (0.0 - 1.0)
    #[serde(default = "default_volume")]
    pub track_volume: f64,

    /// Volume of all samples (0.0 - 1.0)
    #[serde(default = "default_volume")]
    pub sample_volume: f64,

    /// Maximum simultaneously playing channels per sample
    #[serde(default = "default_concurrency")]
    pub sample_concurrency: usize,

    /// Extensions tried when a sample lookup has no exact match
    #[serde(default = "default_extensions")]
    pub sample_extensions: Vec<String>,

    /// Interval between device topology polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before the first device topology poll
    #[serde(default = "default_poll_interval_ms")]
    pub initial_poll_delay_ms: u64,

    /// Never initialise real hardware; only the "no sound" device is allowed
    #[serde(default)]
    pub headless: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            preferred_device: String::new(),
            track_volume: default_volume(),
            sample_volume: default_volume(),
            sample_concurrency: default_concurrency(),
            sample_extensions: default_extensions(),
            poll_interval_ms: default_poll_interval_ms(),
            initial_poll_delay_ms: default_poll_interval_ms(),
            headless: false,
        }
    }
}

impl AudioConfig {
    /// A configuration for tests and headless hosts
    pub fn headless() -> Self {
        Self {
            headless: true,
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn initial_poll_delay(&self) -> Duration {
        Duration::from_millis(self.initial_poll_delay_ms)
    }

    /// Clamp values into range, rejecting what can't be repaired.
    pub fn validate(mut self) -> Result<Self> {
        if !self.track_volume.is_finite() || !self.sample_volume.is_finite() {
            return Err(ConfigError::Invalid("volume must be a finite number".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        self.track_volume = self.track_volume.clamp(0.0, 1.0);
        self.sample_volume = self.sample_volume.clamp(0.0, 1.0);
        if self.sample_concurrency == 0 {
            warn!("sample_concurrency of 0 raised to 1");
            self.sample_concurrency = 1;
        }
        self.sample_extensions = self
            .sample_extensions
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_string())
            .filter(|ext| !ext.is_empty())
            .collect();

        Ok(self)
    }

    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;

        debug!("Configuration loaded successfully");
        config.validate()
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }
}

/// Configuration manager
///
/// Manages `audio.toml` inside the configuration directory
/// (`~/.config/sonority` by default).
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("audio.toml");

        Self {
            config_dir,
            config_path,
        }
    }

    /// Get the default config directory path
    ///
    /// Returns `~/.config/sonority` on Linux, the platform equivalent elsewhere
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("sonority"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// If the config file doesn't exist, writes and returns the defaults.
    /// If the config file is corrupt, backs it up and returns the defaults.
    #[instrument(skip(self))]
    pub async fn load(&self) -> AudioConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating default"
            );

            let config = AudioConfig::default();
            if let Err(e) = config.save_to_file(&self.config_path).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save default config"
                );
            }

            return config;
        }

        match AudioConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using defaults"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                AudioConfig::default()
            }
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &AudioConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
