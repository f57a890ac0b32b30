use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{mood::MoodProfile, ConnectorError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub connector: ConnectorConfig,
    /// Extra mood profiles layered over the built-in catalog.
    pub moods: Vec<MoodProfile>,
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Parses a JSON document. Missing sections fall back to their defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the connector tuning and that every extra mood is named.
    pub fn validate(&self) -> Result<()> {
        self.connector.validate()?;
        for (index, mood) in self.moods.iter().enumerate() {
            if mood.key.trim().is_empty() {
                return Err(ConnectorError::Config(format!(
                    "moods[{index}] needs a non-empty key"
                )));
            }
        }
        Ok(())
    }

    /// Reads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Tuning for the analysis pipeline and its tick cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    pub tick_rate_hz: u32,
    pub detail_bands: usize,
    /// Per-tick multiplier applied to every feature while no spectrum arrives.
    pub decay_factor: f32,
    pub smoothing: SmoothingConfig,
    pub beat: BeatConfig,
    pub peak: PeakConfig,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            detail_bands: 24,
            decay_factor: 0.99,
            smoothing: SmoothingConfig::default(),
            beat: BeatConfig::default(),
            peak: PeakConfig::default(),
        }
    }
}

impl ConnectorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_rate_hz == 0 {
            return Err(ConnectorError::Config("tick_rate_hz must be > 0".into()));
        }
        if self.detail_bands == 0 {
            return Err(ConnectorError::Config("detail_bands must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.decay_factor) {
            return Err(ConnectorError::Config(format!(
                "decay_factor must be in [0, 1), got {}",
                self.decay_factor
            )));
        }
        if self.beat.history_size == 0 {
            return Err(ConnectorError::Config(
                "beat.history_size must be > 0".into(),
            ));
        }

        let factors = [
            ("smoothing.rise", self.smoothing.rise),
            ("smoothing.fall", self.smoothing.fall),
            ("peak.attack", self.peak.attack),
            ("peak.release", self.peak.release),
        ];
        for (name, value) in factors {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConnectorError::Config(format!(
                    "{name} must be in (0, 1], got {value}"
                )));
            }
        }

        // detail factors are capped at 1 once scaled, so only the sign matters
        let scales = [
            ("smoothing.detail_rise_scale", self.smoothing.detail_rise_scale),
            ("smoothing.detail_fall_scale", self.smoothing.detail_fall_scale),
        ];
        for (name, value) in scales {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ConnectorError::Config(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }

        Ok(())
    }
}

/// Rise/fall pair for band power smoothing. Detail bands scale these up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub rise: f32,
    pub fall: f32,
    pub detail_rise_scale: f32,
    pub detail_fall_scale: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            rise: 0.3,
            fall: 0.1,
            detail_rise_scale: 1.2,
            detail_fall_scale: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    /// Ring length; 43 ticks is about one second at 60 Hz.
    pub history_size: usize,
    pub min_interval_ms: u64,
    /// Slope of the variance-to-coefficient line.
    pub variance_slope: f32,
    /// Intercept of the variance-to-coefficient line.
    pub variance_intercept: f32,
    pub cutoff_floor: f32,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            history_size: 43,
            min_interval_ms: 200,
            variance_slope: -0.0025714,
            variance_intercept: 1.5142857,
            cutoff_floor: 0.1,
        }
    }
}

impl BeatConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    pub threshold_multiplier: f32,
    pub cooldown_frames: u64,
    pub impact_scale: f32,
    /// Factor used when the impact target is at or above the current value.
    pub attack: f32,
    /// Factor used while the impact decays toward a lower target.
    pub release: f32,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            threshold_multiplier: 1.2,
            cooldown_frames: 15,
            impact_scale: 2.5,
            attack: 0.9,
            release: 0.05,
        }
    }
}
