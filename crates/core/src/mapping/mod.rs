use serde::{Deserialize, Serialize};

use crate::{analysis::FeatureState, mood::MoodProfile};

/// Dreaminess above which shake gets amplified.
const DREAMY_SHAKE_THRESHOLD: f32 = 0.6;
const DREAMY_SHAKE_BOOST: f32 = 1.5;
const MAX_TEMPO_BPM: f32 = 300.0;

/// Inclusive bounds applied to one output parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: f32,
    pub max: f32,
}

impl ParameterRange {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Clamps `value` into the range. NaN maps to the lower bound.
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            self.min
        } else {
            value.clamp(self.min, self.max)
        }
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

pub const GLOBAL_INTENSITY: ParameterRange = ParameterRange::new(0.5, 1.5);
pub const MOTION_SPEED: ParameterRange = ParameterRange::new(0.1, 2.5);
pub const DREAMINESS: ParameterRange = ParameterRange::new(0.0, 1.0);
pub const SHAKE: ParameterRange = ParameterRange::new(0.0, 0.1);
pub const PARTICLE_SIZE: ParameterRange = ParameterRange::new(0.5, 2.5);
pub const SPARKLE: ParameterRange = ParameterRange::new(0.0, 1.0);
pub const EXPLOSIVENESS: ParameterRange = ParameterRange::new(0.0, 1.0);
pub const TERRAIN_HEIGHT: ParameterRange = ParameterRange::new(0.2, 2.5);
pub const PULSE_STRENGTH: ParameterRange = ParameterRange::new(0.0, 1.0);
pub const GLOW: ParameterRange = ParameterRange::new(0.1, 2.5);
pub const FLUIDITY: ParameterRange = ParameterRange::new(0.0, 1.5);
pub const MORPH_SPEED: ParameterRange = ParameterRange::new(0.05, 2.0);
pub const COLOR_SHIFT: ParameterRange = ParameterRange::new(0.0, 1.0);
pub const SATURATION: ParameterRange = ParameterRange::new(0.5, 1.3);
pub const HUE_SPEED: ParameterRange = ParameterRange::new(0.0, 0.6);
pub const WARMTH: ParameterRange = ParameterRange::new(0.0, 1.0);
pub const CAMERA_ZOOM: ParameterRange = ParameterRange::new(0.8, 1.3);
pub const WAVE_AMPLITUDE: ParameterRange = ParameterRange::new(0.1, 1.5);
pub const TRAIL_LENGTH: ParameterRange = ParameterRange::new(0.1, 1.0);
pub const PARTICLE_DENSITY: ParameterRange = ParameterRange::new(0.2, 1.0);
pub const ABERRATION: ParameterRange = ParameterRange::new(0.0, 0.03);
pub const VIGNETTE: ParameterRange = ParameterRange::new(0.1, 0.6);
pub const FILTER_CUTOFF: ParameterRange = ParameterRange::new(0.05, 1.0);
pub const SYNTH_VOLUME: ParameterRange = ParameterRange::new(0.0, 1.0);
pub const REVERB_MIX: ParameterRange = ParameterRange::new(0.0, 0.8);
pub const BASS_IMPACT: ParameterRange = ParameterRange::new(0.0, 1.0);
pub const TEMPO_BPM: ParameterRange = ParameterRange::new(0.0, MAX_TEMPO_BPM);

/// Control values published once per tick for renderers and synthesisers.
///
/// Every field is owned; consumers can keep a snapshot around without
/// holding on to connector state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub global_intensity: f32,
    pub motion_speed: f32,
    pub dreaminess: f32,
    pub shake: f32,
    pub particle_size: f32,
    pub sparkle: f32,
    pub explosiveness: f32,
    pub terrain_height: f32,
    pub pulse_strength: f32,
    pub glow: f32,
    pub fluidity: f32,
    pub morph_speed: f32,
    pub color_shift: f32,
    pub saturation: f32,
    pub hue_speed: f32,
    pub warmth: f32,
    pub camera_zoom: f32,
    pub wave_amplitude: f32,
    pub trail_length: f32,
    pub particle_density: f32,
    pub aberration: f32,
    pub vignette: f32,
    pub filter_cutoff: f32,
    pub synth_volume: f32,
    pub reverb_mix: f32,
    pub bass_impact: f32,
    pub tempo_bpm: f32,
    pub is_beat: bool,
    pub detail_bands: Vec<f32>,
}

impl ParameterSnapshot {
    /// Resting values published before the first tick and after a reset.
    pub fn defaults(detail_bands: usize) -> Self {
        Self {
            global_intensity: 1.0,
            motion_speed: 1.0,
            dreaminess: 0.5,
            shake: 0.0,
            particle_size: 1.0,
            sparkle: 0.0,
            explosiveness: 0.0,
            terrain_height: 0.5,
            pulse_strength: 0.0,
            glow: 1.0,
            fluidity: 0.5,
            morph_speed: 0.5,
            color_shift: 0.0,
            saturation: 1.0,
            hue_speed: 0.0,
            warmth: 0.5,
            camera_zoom: 1.0,
            wave_amplitude: 0.3,
            trail_length: 0.5,
            particle_density: 0.5,
            aberration: 0.0,
            vignette: 0.3,
            filter_cutoff: 0.5,
            synth_volume: 0.7,
            reverb_mix: 0.2,
            bass_impact: 0.0,
            tempo_bpm: 0.0,
            is_beat: false,
            detail_bands: vec![0.0; detail_bands],
        }
    }

    /// Every scalar parameter with its name and bounds.
    pub fn scalars(&self) -> [(&'static str, f32, ParameterRange); 27] {
        [
            ("global_intensity", self.global_intensity, GLOBAL_INTENSITY),
            ("motion_speed", self.motion_speed, MOTION_SPEED),
            ("dreaminess", self.dreaminess, DREAMINESS),
            ("shake", self.shake, SHAKE),
            ("particle_size", self.particle_size, PARTICLE_SIZE),
            ("sparkle", self.sparkle, SPARKLE),
            ("explosiveness", self.explosiveness, EXPLOSIVENESS),
            ("terrain_height", self.terrain_height, TERRAIN_HEIGHT),
            ("pulse_strength", self.pulse_strength, PULSE_STRENGTH),
            ("glow", self.glow, GLOW),
            ("fluidity", self.fluidity, FLUIDITY),
            ("morph_speed", self.morph_speed, MORPH_SPEED),
            ("color_shift", self.color_shift, COLOR_SHIFT),
            ("saturation", self.saturation, SATURATION),
            ("hue_speed", self.hue_speed, HUE_SPEED),
            ("warmth", self.warmth, WARMTH),
            ("camera_zoom", self.camera_zoom, CAMERA_ZOOM),
            ("wave_amplitude", self.wave_amplitude, WAVE_AMPLITUDE),
            ("trail_length", self.trail_length, TRAIL_LENGTH),
            ("particle_density", self.particle_density, PARTICLE_DENSITY),
            ("aberration", self.aberration, ABERRATION),
            ("vignette", self.vignette, VIGNETTE),
            ("filter_cutoff", self.filter_cutoff, FILTER_CUTOFF),
            ("synth_volume", self.synth_volume, SYNTH_VOLUME),
            ("reverb_mix", self.reverb_mix, REVERB_MIX),
            ("bass_impact", self.bass_impact, BASS_IMPACT),
            ("tempo_bpm", self.tempo_bpm, TEMPO_BPM),
        ]
    }
}

/// Stateless fan-out from smoothed features to clamped parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterMapper;

impl ParameterMapper {
    pub fn new() -> Self {
        Self
    }

    /// Builds a fresh snapshot. Without a mood the calm defaults apply.
    pub fn map(&self, state: &FeatureState, mood: Option<&MoodProfile>) -> ParameterSnapshot {
        let fallback;
        let mood = match mood {
            Some(profile) => profile,
            None => {
                fallback = MoodProfile::default();
                &fallback
            }
        };

        let bass = unit(state.bass_power);
        let mid = unit(state.mid_power);
        let treble = unit(state.treble_power);
        let overall = unit(state.overall_power);
        let impact = unit(state.bass_impact);
        let is_beat = state.is_beat();

        let dreaminess = DREAMINESS.clamp(mood.dreaminess + treble * 0.2 - bass * 0.15);
        let mut shake = impact * 0.2;
        if dreaminess > DREAMY_SHAKE_THRESHOLD {
            shake *= DREAMY_SHAKE_BOOST;
        }
        let pulse = if is_beat { 0.5 + bass * 0.5 } else { 0.0 };

        ParameterSnapshot {
            global_intensity: GLOBAL_INTENSITY.clamp(0.7 + overall * 0.6),
            motion_speed: MOTION_SPEED.clamp(mood.speed * (1.0 + mid)),
            dreaminess,
            shake: SHAKE.clamp(shake),
            particle_size: PARTICLE_SIZE.clamp(1.0 + treble * 0.4 + impact * 0.8),
            sparkle: SPARKLE.clamp(treble * 1.2),
            explosiveness: EXPLOSIVENESS.clamp(impact * 1.5),
            terrain_height: TERRAIN_HEIGHT.clamp(0.5 + bass * 1.5),
            pulse_strength: PULSE_STRENGTH.clamp(pulse),
            glow: GLOW.clamp(mood.bloom * (1.0 + treble * 0.8)),
            fluidity: FLUIDITY.clamp(mood.fluidity + mid * 0.3),
            morph_speed: MORPH_SPEED.clamp(mood.morph_speed * (1.0 + overall * 0.5)),
            color_shift: COLOR_SHIFT.clamp(mid * 0.5 + treble * 0.3),
            saturation: SATURATION.clamp(0.8 + overall * 0.4),
            hue_speed: HUE_SPEED.clamp(0.05 + mid * 0.4),
            warmth: WARMTH.clamp(mood.warmth + bass * 0.2 - treble * 0.1),
            camera_zoom: CAMERA_ZOOM.clamp(1.0 + impact * 0.15 + bass * 0.05),
            wave_amplitude: WAVE_AMPLITUDE.clamp(0.3 + bass * 0.7 + mid * 0.3),
            trail_length: TRAIL_LENGTH.clamp(0.5 + dreaminess * 0.4 - overall * 0.2),
            particle_density: PARTICLE_DENSITY.clamp(0.4 + overall * 0.6),
            aberration: ABERRATION.clamp(impact * 0.02 + treble * 0.005),
            vignette: VIGNETTE.clamp(0.4 - overall * 0.2),
            filter_cutoff: FILTER_CUTOFF.clamp(0.3 + treble * 0.5 + mid * 0.2),
            synth_volume: SYNTH_VOLUME.clamp(mood.volume * (0.6 + overall * 0.4)),
            reverb_mix: REVERB_MIX.clamp(0.2 + dreaminess * 0.5),
            bass_impact: BASS_IMPACT.clamp(impact),
            tempo_bpm: TEMPO_BPM.clamp(state.beat.tempo_bpm().unwrap_or(0.0)),
            is_beat,
            detail_bands: state.detail_bands().iter().map(|band| unit(*band)).collect(),
        }
    }
}

fn unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ConnectorConfig;

    fn saturated_state() -> FeatureState {
        let mut state = FeatureState::new(&ConnectorConfig::default());
        state.bass_power = 1.0;
        state.mid_power = 1.0;
        state.treble_power = 1.0;
        state.overall_power = 1.0;
        state.bass_impact = 1.0;
        state.detail_bands_mut().fill(1.0);
        assert!(state.beat.process(1.0, Duration::ZERO));
        state
    }

    fn assert_in_range(snapshot: &ParameterSnapshot) {
        for (name, value, range) in snapshot.scalars() {
            assert!(range.contains(value), "{name} = {value} outside {range:?}");
        }
        assert!(snapshot.detail_bands.iter().all(|band| (0.0..=1.0).contains(band)));
    }

    #[test]
    fn saturated_features_stay_in_range_for_every_mood() {
        let state = saturated_state();
        let mapper = ParameterMapper::new();
        let extreme = MoodProfile {
            key: "extreme".to_string(),
            speed: 10.0,
            dreaminess: 5.0,
            fluidity: 5.0,
            morph_speed: 10.0,
            bloom: 10.0,
            warmth: 5.0,
            volume: 5.0,
        };
        let catalog = crate::MoodCatalog::with_profiles([extreme]);

        for key in catalog.keys() {
            let snapshot = mapper.map(&state, catalog.get(key));
            assert_in_range(&snapshot);
            assert!(snapshot.is_beat);
        }
        assert_in_range(&mapper.map(&state, None));
    }

    #[test]
    fn silent_features_stay_in_range() {
        let state = FeatureState::new(&ConnectorConfig::default());
        let snapshot = ParameterMapper::new().map(&state, None);
        assert_in_range(&snapshot);
        assert_eq!(snapshot.pulse_strength, 0.0);
        assert!((snapshot.global_intensity - 0.7).abs() < 1e-6);
    }

    #[test]
    fn follows_documented_formulas() {
        let mut state = FeatureState::new(&ConnectorConfig::default());
        state.bass_power = 0.2;
        state.mid_power = 0.5;
        state.treble_power = 0.4;
        state.overall_power = 0.5;
        state.bass_impact = 0.25;
        let mood = MoodProfile::default();

        let snapshot = ParameterMapper::new().map(&state, Some(&mood));
        assert!((snapshot.global_intensity - 1.0).abs() < 1e-6);
        assert!((snapshot.motion_speed - 1.2).abs() < 1e-6);
        assert!((snapshot.dreaminess - 0.55).abs() < 1e-6);
        assert!((snapshot.shake - 0.05).abs() < 1e-6);
        assert!((snapshot.terrain_height - 0.8).abs() < 1e-6);
        assert!((snapshot.glow - 1.32).abs() < 1e-6);
        assert_eq!(snapshot.pulse_strength, 0.0);
    }

    #[test]
    fn dreamy_moods_amplify_shake() {
        let mut state = FeatureState::new(&ConnectorConfig::default());
        state.bass_impact = 0.2;
        let calm = ParameterMapper::new().map(&state, Some(&MoodProfile::default()));
        let dreamy = MoodProfile {
            dreaminess: 0.8,
            ..Default::default()
        };
        let amplified = ParameterMapper::new().map(&state, Some(&dreamy));

        assert!((calm.shake - 0.04).abs() < 1e-6);
        assert!((amplified.shake - 0.06).abs() < 1e-6);
    }

    #[test]
    fn pulse_only_on_beats() {
        let mut state = FeatureState::new(&ConnectorConfig::default());
        state.bass_power = 0.6;
        assert_eq!(ParameterMapper::new().map(&state, None).pulse_strength, 0.0);

        state.beat.process(0.6, Duration::ZERO);
        let snapshot = ParameterMapper::new().map(&state, None);
        assert!((snapshot.pulse_strength - 0.8).abs() < 1e-6);
    }

    #[test]
    fn defaults_are_within_range() {
        let defaults = ParameterSnapshot::defaults(24);
        assert_in_range(&defaults);
        assert_eq!(defaults.global_intensity, 1.0);
        assert_eq!(defaults.detail_bands, vec![0.0; 24]);
    }
}
