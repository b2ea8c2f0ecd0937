//! Runtime configuration
//!
//! Resolves the settings file and applies command-line overrides on top of
//! it. Everything downstream takes a `RuntimeConfig`, never raw settings.

use crate::error::{Error, Result};
use crate::pacing::SamplerConfig;
use crate::sound::RingConfig;
use emupace_common::config::Settings;
use emupace_common::timing::TickRate;
use std::path::PathBuf;

/// Command-line overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub tick_rate: Option<TickRate>,
    pub no_sound: bool,
}

/// Fully resolved configuration for one run
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub sampler: SamplerConfig,
    pub lag_cap: u32,

    pub sound_enabled: bool,
    pub sample_rate: u32,
    pub device: Option<String>,
    pub ring: RingConfig,
    pub desired_min_filled_blocks: u32,

    pub run_in_background: bool,
    pub log_level: String,
}

impl RuntimeConfig {
    /// Load settings (see [`Settings::load`]) and apply `overrides`.
    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        let settings = Settings::load(overrides.config_path.as_deref())?;
        Self::from_settings(&settings, &overrides)
    }

    pub fn from_settings(settings: &Settings, overrides: &ConfigOverrides) -> Result<Self> {
        settings.validate()?;

        let rate = match overrides.tick_rate {
            Some(rate) => rate,
            None => settings.clock.tick_rate()?,
        };
        let ring = RingConfig::from_settings(&settings.sound)?;
        if settings.sound.desired_min_filled_blocks >= ring.geometry.blocks() {
            return Err(Error::Config(format!(
                "desired minimum of {} filled blocks leaves no headroom in a ring of {}",
                settings.sound.desired_min_filled_blocks,
                ring.geometry.blocks()
            )));
        }

        Ok(Self {
            sampler: SamplerConfig {
                rate,
                suspend_threshold_ms: settings.clock.suspend_threshold_ms,
                backward_tolerance_ms: settings.clock.backward_tolerance_ms,
            },
            lag_cap: settings.clock.lag_cap,
            sound_enabled: settings.sound.enabled && !overrides.no_sound,
            sample_rate: settings.sound.sample_rate,
            device: settings.sound.device.clone(),
            ring,
            desired_min_filled_blocks: settings.sound.desired_min_filled_blocks,
            run_in_background: settings.run.run_in_background,
            log_level: settings.logging.level.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve() {
        let config =
            RuntimeConfig::from_settings(&Settings::default(), &ConfigOverrides::default())
                .unwrap();
        assert_eq!(config.sampler.rate, TickRate::mac_plus());
        assert_eq!(config.lag_cap, 8);
        assert_eq!(config.ring.geometry.blocks(), 16);
        assert_eq!(config.ring.start_threshold_blocks, 12);
        assert!(config.sound_enabled);
    }

    #[test]
    fn test_overrides_win() {
        let overrides = ConfigOverrides {
            tick_rate: Some(TickRate::new(60, 1).unwrap()),
            no_sound: true,
            ..ConfigOverrides::default()
        };
        let config = RuntimeConfig::from_settings(&Settings::default(), &overrides).unwrap();
        assert_eq!(config.sampler.rate.numerator(), 60);
        assert!(!config.sound_enabled);
    }
}
