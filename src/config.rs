//! Inlet configuration
//!
//! Values are read from a TOML file, either at an explicit path or in the
//! platform configuration directory. Missing fields take their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_BLOCK_SIZE, DEFAULT_BUFFER_BLOCKS, DEFAULT_JOIN_GRACE_MS, DEFAULT_LAG_BLOCKS,
    DEFAULT_OPEN_BUFFER_SECS, DEFAULT_OUTPUTS, DEFAULT_RESOLVE_TIMEOUT_SECS, DEFAULT_SAMPLE_RATE,
    VALID_OUTPUTS,
};
use crate::error::ConfigError;

const CONFIG_FILE_NAME: &str = "inlet.toml";

/// Construction-time options for one inlet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InletConfig {
    /// Number of signal outputs (1, 2, 4, 8, 16 or 32)
    pub outputs: u32,

    /// Local audio block size in samples
    pub block_size: usize,

    /// Local audio sampling rate in Hz
    pub sample_rate: f64,

    /// Ring buffer length, in local blocks
    pub buffer_blocks: usize,

    /// Buffering delay before output starts, in local blocks
    pub lag_blocks: usize,

    /// Upper bound for one discovery call
    pub resolve_timeout_secs: f64,

    /// Buffer hint passed to the transport when opening a stream
    pub open_buffer_secs: f64,

    /// How long disconnect waits for the acquisition thread to exit
    pub join_grace_ms: u64,
}

impl Default for InletConfig {
    fn default() -> Self {
        Self {
            outputs: DEFAULT_OUTPUTS,
            block_size: DEFAULT_BLOCK_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_blocks: DEFAULT_BUFFER_BLOCKS,
            lag_blocks: DEFAULT_LAG_BLOCKS,
            resolve_timeout_secs: DEFAULT_RESOLVE_TIMEOUT_SECS,
            open_buffer_secs: DEFAULT_OPEN_BUFFER_SECS,
            join_grace_ms: DEFAULT_JOIN_GRACE_MS,
        }
    }
}

impl InletConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from the platform config directory, or fall back to defaults
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Platform-specific location of `inlet.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "stream-inlet", "stream-inlet")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_OUTPUTS.contains(&self.outputs) {
            return Err(ConfigError::InvalidOutputChannels(self.outputs));
        }
        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.buffer_blocks == 0 {
            return Err(ConfigError::ZeroBufferLength);
        }
        if self.lag_blocks >= self.buffer_blocks {
            return Err(ConfigError::LagExceedsBuffer {
                lag_blocks: self.lag_blocks,
                buffer_blocks: self.buffer_blocks,
            });
        }
        Ok(())
    }

    pub fn outputs(&self) -> usize {
        self.outputs as usize
    }

    /// Ring buffer length in samples
    pub fn buffer_len(&self) -> usize {
        self.block_size * self.buffer_blocks
    }

    /// Lag in local samples
    pub fn lag_samples(&self) -> usize {
        self.block_size * self.lag_blocks
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.resolve_timeout_secs.max(0.0))
    }

    pub fn open_buffer(&self) -> Duration {
        Duration::from_secs_f64(self.open_buffer_secs.max(0.0))
    }

    pub fn join_grace(&self) -> Duration {
        Duration::from_millis(self.join_grace_ms)
    }
}
