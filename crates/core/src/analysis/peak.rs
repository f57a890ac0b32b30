use tracing::debug;

use super::smoother::AdaptiveSmoother;
use crate::config::PeakConfig;

/// Transient detector for bass hits.
///
/// A peak is an excursion above the rolling mean scaled by a multiplier.
/// Accepted peaks are spaced by a cooldown counted in frames, and their
/// overshoot feeds an impact envelope that jumps up and fades out.
#[derive(Debug, Clone)]
pub struct PeakDetector {
    config: PeakConfig,
    frame: u64,
    last_peak: Option<u64>,
    impact: AdaptiveSmoother,
}

impl PeakDetector {
    pub fn new(config: PeakConfig) -> Self {
        Self {
            frame: 0,
            last_peak: None,
            // attack when the target is at or above the envelope, release below
            impact: AdaptiveSmoother::new(config.attack, config.release),
            config,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    /// Advances one frame and returns the raw impact magnitude, which is zero
    /// unless a peak was accepted on this frame.
    pub fn process(&mut self, bass_power: f32, rolling_mean: f32) -> f32 {
        self.frame += 1;

        let threshold = rolling_mean * self.config.threshold_multiplier;
        let cooled = self
            .last_peak
            .map(|last| self.frame - last >= self.config.cooldown_frames)
            .unwrap_or(true);

        if bass_power > threshold && cooled {
            self.last_peak = Some(self.frame);
            let impact = ((bass_power - threshold) * self.config.impact_scale).min(1.0);
            debug!(frame = self.frame, bass_power, threshold, impact, "bass peak");
            impact
        } else {
            0.0
        }
    }

    /// Advances the frame counter on ticks that carried no spectrum.
    pub fn skip_frame(&mut self) {
        self.frame += 1;
    }

    /// Moves the impact envelope toward `raw`.
    pub fn smooth_impact(&self, current: f32, raw: f32) -> f32 {
        self.impact.step(current, raw).clamp(0.0, 1.0)
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn last_peak(&self) -> Option<u64> {
        self.last_peak
    }
}
