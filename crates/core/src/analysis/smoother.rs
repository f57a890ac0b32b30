use serde::{Deserialize, Serialize};

/// Asymmetric exponential smoothing with one factor for rising targets and
/// another for falling ones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveSmoother {
    pub rise: f32,
    pub fall: f32,
}

impl Default for AdaptiveSmoother {
    /// Band power pair: quick to follow transients, slow to let go.
    fn default() -> Self {
        Self::new(0.3, 0.1)
    }
}

impl AdaptiveSmoother {
    pub const fn new(rise: f32, fall: f32) -> Self {
        Self { rise, fall }
    }

    /// Returns a copy with both factors multiplied, capped at 1.
    pub fn scaled(self, rise_scale: f32, fall_scale: f32) -> Self {
        Self {
            rise: (self.rise * rise_scale).min(1.0),
            fall: (self.fall * fall_scale).min(1.0),
        }
    }

    /// Next smoothed value. NaN on either side yields exactly 0 so a corrupt
    /// sample cannot linger in the state.
    pub fn step(&self, current: f32, target: f32) -> f32 {
        if current.is_nan() || target.is_nan() {
            return 0.0;
        }

        let factor = if target >= current { self.rise } else { self.fall };
        current * (1.0 - factor) + target * factor
    }

    /// Smooths `value` toward `target` in place and returns the new value.
    pub fn apply(&self, value: &mut f32, target: f32) -> f32 {
        *value = self.step(*value, target);
        *value
    }
}
