//! Settings file model and discovery
//!
//! Settings come from a single TOML file. Every field carries a default, so
//! a partial file, or no file at all, still yields a working configuration.
//!
//! Discovery priority:
//! 1. Explicit path (command-line argument)
//! 2. `EMUPACE_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/emupace/config.toml`)
//! 4. Built-in defaults
//!
//! A path named explicitly (1 or 2) that cannot be read is an error. A missing
//! platform file is not: it is logged and defaults are used.

use crate::timing::TickRate;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the settings file
pub const CONFIG_ENV_VAR: &str = "EMUPACE_CONFIG";

/// Complete settings file
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub clock: ClockSettings,
    pub sound: SoundSettings,
    pub run: RunSettings,
    pub logging: LoggingSettings,
}

/// `[clock]` section: wall-clock sampling and catch-up
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ClockSettings {
    /// Ticks per second numerator
    pub tick_rate_num: u32,

    /// Ticks per second denominator
    pub tick_rate_den: u32,

    /// Overdue time (ms) beyond which the host is assumed to have suspended
    /// us; the backlog is forgotten instead of replayed
    pub suspend_threshold_ms: u32,

    /// Backward clock movement (ms) between two readings tolerated before
    /// resynchronising
    pub backward_tolerance_ms: u32,

    /// Most ticks executed in a single pass
    pub lag_cap: u32,
}

impl Default for ClockSettings {
    fn default() -> Self {
        let (num, den) = crate::timing::MAC_PLUS_TICK_RATE;
        Self {
            tick_rate_num: num,
            tick_rate_den: den,
            suspend_threshold_ms: 64,
            backward_tolerance_ms: 20,
            lag_cap: 8,
        }
    }
}

impl ClockSettings {
    pub fn tick_rate(&self) -> Result<TickRate> {
        TickRate::new(self.tick_rate_num, self.tick_rate_den)
    }
}

/// `[sound]` section: audio ring geometry and output device
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SoundSettings {
    /// Open an audio device at all
    pub enabled: bool,

    /// Output sample rate (Hz)
    pub sample_rate: u32,

    /// log2 of the block length in bytes
    pub ln2_block_len: u32,

    /// log2 of the number of blocks in the ring
    pub ln2_blocks: u32,

    /// Filled blocks required before playback leaves the "not started" state
    pub start_threshold_blocks: u32,

    /// Minimum filled-block level the drift corrector steers toward
    pub desired_min_filled_blocks: u32,

    /// Byte emitted on underrun (0x80 is silence for unsigned 8-bit)
    pub silence: u8,

    /// Output device name (None = host default)
    pub device: Option<String>,
}

impl Default for SoundSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            // round(7833600 * 2 / 704)
            sample_rate: 22255,
            ln2_block_len: 9,
            ln2_blocks: 4,
            start_threshold_blocks: 12,
            desired_min_filled_blocks: 3,
            silence: 0x80,
            device: None,
        }
    }
}

impl SoundSettings {
    pub fn block_len(&self) -> u32 {
        1 << self.ln2_block_len
    }

    pub fn blocks(&self) -> u32 {
        1 << self.ln2_blocks
    }
}

/// `[run]` section
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunSettings {
    /// Keep emulating while the host window is in the background
    pub run_in_background: bool,
}

/// `[logging]` section
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error), used when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text and validate them.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a file and validate them.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Resolve and load settings following the discovery priority.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match resolve_config_path(explicit) {
            ConfigSource::Explicit(path) => {
                info!("Loading settings from {}", path.display());
                Self::from_file(&path)
            }
            ConfigSource::Platform(path) => {
                info!("Loading settings from {}", path.display());
                Self::from_file(&path)
            }
            ConfigSource::Defaults => {
                warn!("No settings file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.clock.tick_rate()?;

        if self.clock.lag_cap == 0 {
            return Err(Error::Config("clock.lag_cap must be at least 1".to_string()));
        }

        let sound = &self.sound;
        if sound.sample_rate == 0 {
            return Err(Error::Config("sound.sample_rate must be non-zero".to_string()));
        }
        if sound.ln2_blocks < 2 {
            return Err(Error::Config(format!(
                "sound.ln2_blocks = {} gives fewer than 4 blocks",
                sound.ln2_blocks
            )));
        }
        if sound.ln2_block_len + sound.ln2_blocks > 24 {
            return Err(Error::Config(format!(
                "sound ring of 2^{} bytes is too large",
                sound.ln2_block_len + sound.ln2_blocks
            )));
        }
        if sound.start_threshold_blocks > sound.blocks() {
            return Err(Error::Config(format!(
                "sound.start_threshold_blocks ({}) exceeds block count ({})",
                sound.start_threshold_blocks,
                sound.blocks()
            )));
        }
        if sound.desired_min_filled_blocks > sound.blocks() {
            return Err(Error::Config(format!(
                "sound.desired_min_filled_blocks ({}) exceeds block count ({})",
                sound.desired_min_filled_blocks,
                sound.blocks()
            )));
        }

        Ok(())
    }
}

/// Where settings were found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Named on the command line or by environment variable
    Explicit(PathBuf),
    /// Found in the platform config directory
    Platform(PathBuf),
    /// Nothing found
    Defaults,
}

/// Apply the discovery priority without reading anything.
pub fn resolve_config_path(explicit: Option<&Path>) -> ConfigSource {
    // Priority 1: Command-line argument
    if let Some(path) = explicit {
        return ConfigSource::Explicit(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return ConfigSource::Explicit(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    if let Some(path) = platform_config_path() {
        if path.exists() {
            return ConfigSource::Platform(path);
        }
    }

    // Priority 4: Built-in defaults
    ConfigSource::Defaults
}

/// `<config_dir>/emupace/config.toml` for the current platform
pub fn platform_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("emupace").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.clock.lag_cap, 8);
        assert_eq!(settings.sound.blocks(), 16);
        assert_eq!(settings.sound.block_len(), 512);
        assert_eq!(settings.sound.silence, 0x80);
        assert_eq!(settings.clock.tick_rate().unwrap(), TickRate::mac_plus());
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        assert_eq!(Settings::from_toml_str("").unwrap(), Settings::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let settings = Settings::from_toml_str("[clock]\nlag_cap = 4\n").unwrap();
        assert_eq!(settings.clock.lag_cap, 4);
        assert_eq!(settings.clock.suspend_threshold_ms, 64);
        assert_eq!(settings.sound, SoundSettings::default());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Settings::from_toml_str("[clock]\nlag_capp = 4\n").is_err());
    }

    #[test]
    fn test_start_threshold_above_capacity_rejected() {
        let err = Settings::from_toml_str("[sound]\nln2_blocks = 3\n").unwrap_err();
        assert!(err.to_string().contains("start_threshold_blocks"));
    }

    #[test]
    fn test_tiny_ring_rejected() {
        let text = "[sound]\nln2_blocks = 1\nstart_threshold_blocks = 1\ndesired_min_filled_blocks = 1\n";
        assert!(Settings::from_toml_str(text).is_err());
    }

    #[test]
    fn test_zero_lag_cap_rejected() {
        assert!(Settings::from_toml_str("[clock]\nlag_cap = 0\n").is_err());
    }
}
