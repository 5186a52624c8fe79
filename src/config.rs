//! Application configuration
//!
//! Every field has a default so an empty TOML file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub ui: UiConfig,
    pub settings: SettingsConfig,
    pub stations: Vec<StationEntry>,
}

/// Timing and buffering parameters of the playback engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of monitor ticks before buffering is considered complete
    pub prebuffer_ticks: u32,
    /// Monitor tick period in milliseconds
    pub tick_interval_ms: u64,
    /// Output queue fill (percent) below which a warning is logged while playing
    pub low_water_percent: u8,
    /// Delay before a dropped network stream is resubmitted
    pub reconnect_delay_ms: u64,
    /// Quiet period before a volume change reaches the sink
    pub volume_debounce_ms: u64,
    /// Quiet period before settings are written to storage
    pub save_debounce_ms: u64,
    /// Capacity (in items) of the queues between stages
    pub stage_queue_capacity: usize,
    /// Capacity (in frames) of the output writer's input queue
    pub output_queue_capacity: usize,
    /// Size of a fetch read / decoded frame in bytes
    pub chunk_bytes: usize,
    /// Sample rate of the raw PCM delivered by sources
    pub input_sample_rate: u32,
    /// Channel count of the raw PCM delivered by sources
    pub input_channels: u16,
    /// Sample rate the output sink runs at
    pub output_sample_rate: u32,
    /// Insert the equalizer stage into new chains
    pub equalizer_enabled: bool,
    /// Volume used when no persisted value exists
    pub default_volume: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prebuffer_ticks: DEFAULT_PREBUFFER_TICKS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            low_water_percent: DEFAULT_LOW_WATER_PERCENT,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            volume_debounce_ms: DEFAULT_VOLUME_DEBOUNCE_MS,
            save_debounce_ms: DEFAULT_SAVE_DEBOUNCE_MS,
            stage_queue_capacity: DEFAULT_STAGE_QUEUE_CAPACITY,
            output_queue_capacity: DEFAULT_OUTPUT_QUEUE_CAPACITY,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            input_sample_rate: DEFAULT_SAMPLE_RATE,
            input_channels: DEFAULT_CHANNELS,
            output_sample_rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            equalizer_enabled: true,
            default_volume: DEFAULT_VOLUME,
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn volume_debounce(&self) -> Duration {
        Duration::from_millis(self.volume_debounce_ms)
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    /// Total prebuffer duration implied by the tick settings
    pub fn prebuffer_duration(&self) -> Duration {
        self.tick_interval() * self.prebuffer_ticks
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.prebuffer_ticks == 0 {
            return Err(Error::Config("prebuffer_ticks must be at least 1".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::Config("tick_interval_ms must be positive".into()));
        }
        if self.stage_queue_capacity == 0 || self.output_queue_capacity == 0 {
            return Err(Error::Config("queue capacities must be positive".into()));
        }
        if self.chunk_bytes < 4 {
            return Err(Error::Config("chunk_bytes must hold at least one frame".into()));
        }
        if !(1..=2).contains(&self.input_channels) {
            return Err(Error::Config(format!(
                "unsupported channel count: {}",
                self.input_channels
            )));
        }
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(Error::Config("sample rates must be positive".into()));
        }
        Ok(())
    }
}

/// Web control surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Persisted settings location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Explicit settings file; defaults to the platform data directory
    pub path: Option<PathBuf>,
}

impl SettingsConfig {
    pub fn resolve_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.data_dir().join("settings.json")))
    }
}

/// One entry of the station directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationEntry {
    pub name: String,
    pub url: String,
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "netradio", "netradio")
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Load from the platform config directory, falling back to defaults
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            _ => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
