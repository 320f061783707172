//! Configuration management for the onair station
//!
//! This module handles loading and validating configuration from environment
//! variables, TOML files, and command-line overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::Catalog;
use crate::scheduler::clock::ZoneSetting;
use crate::scheduler::dispatcher::StationConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Playback behaviour
    pub playback: PlaybackConfig,

    /// Clock configuration
    pub clock: ClockConfig,

    /// Host capabilities
    pub capabilities: CapabilitiesConfig,

    /// Catalog location
    pub catalog: CatalogConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Playback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Fade-out length before scheduled content, in milliseconds
    pub fade_out_ms: u64,

    /// Largest gap between scheduled items that still chains them
    pub chain_gap_threshold_secs: u32,

    /// Start the first rotation track at a random position
    pub random_first_start: bool,

    /// Fixed random seed (optional)
    pub rng_seed: Option<u64>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            fade_out_ms: 3000,
            chain_gap_threshold_secs: 10,
            random_first_start: true,
            rng_seed: None,
        }
    }
}

/// Clock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// `local`, `UTC`, an IANA name such as `America/New_York`, or a fixed offset such as `+09:00`
    pub timezone: String,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            timezone: String::from("local"),
        }
    }
}

/// What the host can do
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitiesConfig {
    /// Player supports volume fades
    pub fade_supported: bool,

    /// Host timers are unreliable; poll instead
    pub opportunistic_mode: bool,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            fade_supported: true,
            opportunistic_mode: false,
        }
    }
}

/// Catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Preprocessed catalog JSON
    pub path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tracks.json"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let fade_out_ms =
            env_parse::<u64>("ONAIR_FADE_OUT_MS").unwrap_or(defaults.playback.fade_out_ms);

        let chain_gap_threshold_secs = env_parse::<u32>("ONAIR_CHAIN_GAP_SECS")
            .unwrap_or(defaults.playback.chain_gap_threshold_secs);

        let random_first_start = env_parse::<bool>("ONAIR_RANDOM_FIRST_START")
            .unwrap_or(defaults.playback.random_first_start);

        let rng_seed = env_parse::<u64>("ONAIR_RNG_SEED");

        let timezone =
            std::env::var("ONAIR_TIMEZONE").unwrap_or_else(|_| defaults.clock.timezone.clone());

        let fade_supported = env_parse::<bool>("ONAIR_FADE_SUPPORTED")
            .unwrap_or(defaults.capabilities.fade_supported);

        let opportunistic_mode = env_parse::<bool>("ONAIR_OPPORTUNISTIC")
            .unwrap_or(defaults.capabilities.opportunistic_mode);

        let catalog_path = std::env::var("ONAIR_CATALOG")
            .map(PathBuf::from)
            .unwrap_or(defaults.catalog.path);

        let log_level = std::env::var("ONAIR_LOG_LEVEL").unwrap_or(defaults.logging.level);

        let log_format = std::env::var("ONAIR_LOG_FORMAT").unwrap_or(defaults.logging.format);

        Ok(Self {
            playback: PlaybackConfig {
                fade_out_ms,
                chain_gap_threshold_secs,
                random_first_start,
                rng_seed,
            },
            clock: ClockConfig { timezone },
            capabilities: CapabilitiesConfig {
                fade_supported,
                opportunistic_mode,
            },
            catalog: CatalogConfig { path: catalog_path },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.capabilities.fade_supported && self.playback.fade_out_ms > 60_000 {
            anyhow::bail!("fade_out_ms must be at most 60000");
        }

        if self.playback.chain_gap_threshold_secs > 3600 {
            anyhow::bail!("chain_gap_threshold_secs must be at most 3600");
        }

        self.zone()?;

        if !matches!(
            self.logging.level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            anyhow::bail!("Unknown log level '{}'", self.logging.level);
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("Log format must be 'text' or 'json', got '{}'", self.logging.format);
        }

        Ok(())
    }

    /// Parsed time zone
    pub fn zone(&self) -> crate::error::Result<ZoneSetting> {
        Ok(ZoneSetting::parse(&self.clock.timezone)?)
    }

    /// Load the configured catalog
    pub fn load_catalog(&self) -> crate::error::Result<Catalog> {
        let catalog = Catalog::from_file(&self.catalog.path)?;
        if !catalog.warnings().is_empty() {
            tracing::warn!(
                path = %self.catalog.path.display(),
                excluded = catalog.warnings().len(),
                "Catalog loaded with excluded records"
            );
        }
        Ok(catalog)
    }

    /// Get fade-out length as Duration
    #[must_use]
    pub fn fade_out(&self) -> Duration {
        Duration::from_millis(self.playback.fade_out_ms)
    }

    /// Station settings derived from this configuration
    #[must_use]
    pub fn station_config(&self) -> StationConfig {
        StationConfig {
            fade_out_ms: self.playback.fade_out_ms,
            fade_supported: self.capabilities.fade_supported,
            chain_gap_threshold_secs: self.playback.chain_gap_threshold_secs,
            random_first_start: self.playback.random_first_start,
            opportunistic: self.capabilities.opportunistic_mode,
            rng_seed: self.playback.rng_seed,
        }
    }
}
