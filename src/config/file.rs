//! Configuration file management for spectrec.
//!
//! This module handles loading and saving application configuration from TOML files.
//! Configuration is stored in the user's config directory and created with
//! defaults the first time it is needed.

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::spectrogram::{NormalizationPolicy, PipelineSettings};

/// Audio capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    /// Audio device to use. Options:
    /// - "default" for system default device
    /// - numeric index (0, 1, 2, etc.) from `spectrec list-devices`
    /// - device name from `spectrec list-devices`
    #[serde(default = "default_device")]
    pub device: String,
    /// Capture sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Samples per analysis frame (power of two)
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
}

fn default_device() -> String {
    "default".to_string()
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_frame_size() -> usize {
    2048
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            sample_rate: default_sample_rate(),
            frame_size: default_frame_size(),
        }
    }
}

/// Spectrogram analysis and display configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpectrogramConfig {
    /// Number of rows kept in the rolling history
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,
    /// "absolute" (0 dB = full-scale magnitude) or "relative" (0 dB = loudest bin of each frame)
    #[serde(default)]
    pub normalization: NormalizationPolicy,
    /// Level mapped to 0.0
    #[serde(default = "default_db_min")]
    pub db_min: f32,
    /// Level mapped to 1.0
    #[serde(default = "default_db_max")]
    pub db_max: f32,
    /// Smallest magnitude used before taking the logarithm
    #[serde(default = "default_floor_epsilon")]
    pub floor_epsilon: f32,
    /// Target time between pipeline ticks in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Deliver the full buffer with every row
    #[serde(default)]
    pub include_snapshot: bool,
}

fn default_history_depth() -> usize {
    100
}

fn default_db_min() -> f32 {
    -120.0
}

fn default_db_max() -> f32 {
    0.0
}

fn default_floor_epsilon() -> f32 {
    1e-10
}

fn default_tick_interval_ms() -> u64 {
    30
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            history_depth: default_history_depth(),
            normalization: NormalizationPolicy::default(),
            db_min: default_db_min(),
            db_max: default_db_max(),
            floor_epsilon: default_floor_epsilon(),
            tick_interval_ms: default_tick_interval_ms(),
            include_snapshot: false,
        }
    }
}

/// Raw audio persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingConfig {
    /// Save captured audio as a WAV file when capture stops.
    ///
    /// The raw audio stays in memory until then, about 10 MB per minute at
    /// 44.1 kHz (roughly 635 MB per hour). Turn this off for long sessions.
    #[serde(default = "default_true")]
    pub save_on_stop: bool,
    /// Directory for saved recordings (defaults to ~/.local/share/spectrec/recordings)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            save_on_stop: true,
            output_dir: None,
        }
    }
}

impl RecordingConfig {
    /// Directory recordings are written to.
    ///
    /// # Errors
    /// - If no output directory is configured and the data directory cannot be determined
    pub fn resolved_output_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.output_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow!("Could not determine local data directory"))?;
        Ok(data_dir.join("spectrec").join("recordings"))
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SpectrecConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub spectrogram: SpectrogramConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
}

impl SpectrecConfig {
    /// Loads configuration from the user's config directory, writing the
    /// defaults there first if no file exists yet.
    ///
    /// # Errors
    /// - If the config directory cannot be determined
    /// - If the config file cannot be read or written
    /// - If the TOML is malformed or a value is out of range
    pub fn load() -> anyhow::Result<Self> {
        let config_path = get_config_path()?;
        if !config_path.exists() {
            tracing::info!("No config found, writing defaults to {}", config_path.display());
            Self::default().save_to(&config_path)?;
        }
        Self::load_from(&config_path)
    }

    /// Loads and validates configuration from `path`.
    ///
    /// # Errors
    /// - If the file cannot be read
    /// - If the TOML is malformed or a value is out of range
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let config_content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: SpectrecConfig = toml::from_str(&config_content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Writes configuration to `path`, creating parent directories.
    ///
    /// # Errors
    /// - If the directory cannot be created or the file cannot be written
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let config_content = toml::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        tracing::debug!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    /// - If any value is out of range, with a message naming the offending key
    pub fn validate(&self) -> anyhow::Result<()> {
        let frame_size = self.audio.frame_size;
        if !frame_size.is_power_of_two() || !(256..=65536).contains(&frame_size) {
            bail!("audio.frame_size must be a power of two between 256 and 65536, got {frame_size}");
        }
        if self.audio.sample_rate == 0 {
            bail!("audio.sample_rate must be greater than zero");
        }
        if self.audio.device.trim().is_empty() {
            bail!("audio.device must not be empty (use \"default\" for the system default)");
        }

        let spectrogram = &self.spectrogram;
        if spectrogram.history_depth == 0 {
            bail!("spectrogram.history_depth must be at least 1");
        }
        if !spectrogram.db_min.is_finite()
            || !spectrogram.db_max.is_finite()
            || spectrogram.db_min >= spectrogram.db_max
        {
            bail!(
                "spectrogram.db_min ({}) must be lower than spectrogram.db_max ({})",
                spectrogram.db_min,
                spectrogram.db_max
            );
        }
        if !(spectrogram.floor_epsilon.is_finite() && spectrogram.floor_epsilon > 0.0) {
            bail!("spectrogram.floor_epsilon must be a small positive number");
        }
        if spectrogram.tick_interval_ms == 0 {
            bail!("spectrogram.tick_interval_ms must be at least 1");
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            history_depth: self.spectrogram.history_depth,
            normalization: self.spectrogram.normalization,
            db_min: self.spectrogram.db_min,
            db_max: self.spectrogram.db_max,
            floor_epsilon: self.spectrogram.floor_epsilon,
            include_snapshot: self.spectrogram.include_snapshot,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.spectrogram.tick_interval_ms)
    }
}

/// Retrieves the path to the config file.
///
/// # Errors
/// - If the home directory cannot be determined
pub fn get_config_path() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(home.join(".config").join("spectrec").join("spectrec.toml"))
}
