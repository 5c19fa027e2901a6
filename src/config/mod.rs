use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

/// Smallest ring capacity accepted
pub const MIN_BUFFER_CHUNKS: usize = 16;

/// Where audio goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputTarget {
    /// The host's default output device
    #[default]
    Default,
    /// A device picked by its cpal name
    Named(String),
    /// Discard audio, paced in real time
    Null,
}

impl FromStr for OutputTarget {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "" | "default" => OutputTarget::Default,
            "null" | "none" => OutputTarget::Null,
            name => OutputTarget::Named(name.to_string()),
        })
    }
}

/// Which replay gain values are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReplayGainMode {
    #[default]
    Off,
    Track,
    Album,
}

/// Player configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Ring buffer capacity in chunks
    pub buffer_chunks: usize,
    /// Percentage of the buffer filled before playback starts
    pub buffer_before_play: f32,
    pub crossfade_seconds: f32,
    pub output: OutputTarget,
    /// Linear software volume, 0..=100
    pub software_volume: u8,
    pub replay_gain: ReplayGainMode,
    pub log_level: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            buffer_chunks: 512,
            buffer_before_play: 10.0,
            crossfade_seconds: 0.0,
            output: OutputTarget::Default,
            software_volume: 100,
            replay_gain: ReplayGainMode::Off,
            log_level: "warn".to_string(),
        }
    }
}

impl PlayerConfig {
    /// Ring capacity with the lower bound applied
    pub fn effective_buffer_chunks(&self) -> usize {
        self.buffer_chunks.max(MIN_BUFFER_CHUNKS)
    }

    /// Number of chunks accumulated before the first chunk is played
    pub fn prebuffer_chunks(&self) -> usize {
        let capacity = self.effective_buffer_chunks();
        let percent = self.buffer_before_play.clamp(0.0, 100.0);
        let chunks = (capacity as f32 * percent / 100.0).round() as usize;
        // A full buffer can never be waited for
        chunks.min(capacity - 1)
    }

    /// Clamp out-of-range values read from disk or the command line
    pub fn normalized(mut self) -> Self {
        self.buffer_chunks = self.effective_buffer_chunks();
        self.buffer_before_play = self.buffer_before_play.clamp(0.0, 100.0);
        self.crossfade_seconds = self.crossfade_seconds.max(0.0);
        self.software_volume = self.software_volume.min(100);
        self
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: PlayerConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Load from the per-user configuration directory
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::with_path(config_path)
    }

    /// Load from an explicit file; a missing file yields the defaults
    pub fn with_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let config = Self::load_config(&config_path)?.normalized();
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut PlayerConfig),
    {
        updater(&mut self.config);
        self.config = self.config.clone().normalized();
        self.save_config()
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = PlayerConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join("musicd");

        std::fs::create_dir_all(&config_dir).map_err(ConfigError::IoError)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<PlayerConfig, ConfigError> {
        if !path.exists() {
            return Ok(PlayerConfig::default());
        }

        let config_content = std::fs::read_to_string(path).map_err(ConfigError::IoError)?;

        let config: PlayerConfig =
            toml::from_str(&config_content).map_err(ConfigError::DeserializationError)?;

        Ok(config)
    }

    pub fn save_config(&self) -> Result<(), ConfigError> {
        // Ensure the parent directory exists
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }

        let config_content =
            toml::to_string_pretty(&self.config).map_err(ConfigError::SerializationError)?;

        std::fs::write(&self.config_path, config_content).map_err(ConfigError::IoError)?;

        Ok(())
    }
}
