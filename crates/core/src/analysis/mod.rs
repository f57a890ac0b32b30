//! Spectrum feature extraction and the detectors that run on its output.

pub mod beat;
pub mod peak;
pub mod smoother;

use std::{ops::Range, time::Duration};

use serde::{Deserialize, Serialize};

pub use beat::BeatDetector;
pub use peak::PeakDetector;
pub use smoother::AdaptiveSmoother;

use crate::{config::ConnectorConfig, SpectrumFrame};

/// Coarse band edges in per-mille of the spectrum length. Everything above
/// the high band is left out.
const LOW_BAND_END: usize = 80;
const MID_BAND_END: usize = 400;
const HIGH_BAND_END: usize = 900;

/// Lowest frequency covered by the detail bands.
const MIN_DETAIL_HZ: f32 = 20.0;

const BASS_WEIGHT: f32 = 1.1;
const MID_WEIGHT: f32 = 1.0;
const TREBLE_WEIGHT: f32 = 0.9;

/// Counters accumulated since construction or the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub ticks: u64,
    /// Ticks that had no spectrum and took the decay path.
    pub idle_ticks: u64,
    pub beats: u64,
    pub peaks: u64,
    pub tempo_bpm: Option<f32>,
}

/// Smoothed features plus the detector state derived from them.
#[derive(Debug, Clone)]
pub struct FeatureState {
    pub bass_power: f32,
    pub mid_power: f32,
    pub treble_power: f32,
    pub overall_power: f32,
    pub bass_impact: f32,
    pub beat: BeatDetector,
    pub peak: PeakDetector,
    detail_bands: Vec<f32>,
}

impl FeatureState {
    pub fn new(config: &ConnectorConfig) -> Self {
        Self {
            bass_power: 0.0,
            mid_power: 0.0,
            treble_power: 0.0,
            overall_power: 0.0,
            bass_impact: 0.0,
            beat: BeatDetector::new(config.beat),
            peak: PeakDetector::new(config.peak),
            detail_bands: vec![0.0; config.detail_bands],
        }
    }

    /// Detail band powers. The length is fixed at construction.
    pub fn detail_bands(&self) -> &[f32] {
        &self.detail_bands
    }

    pub fn detail_bands_mut(&mut self) -> &mut [f32] {
        &mut self.detail_bands
    }

    pub fn is_beat(&self) -> bool {
        self.beat.is_beat()
    }

    pub fn reset(&mut self) {
        self.bass_power = 0.0;
        self.mid_power = 0.0;
        self.treble_power = 0.0;
        self.overall_power = 0.0;
        self.bass_impact = 0.0;
        self.detail_bands.fill(0.0);
        self.beat.reset();
        self.peak.reset();
    }

    fn update_overall(&mut self) {
        let weighted = self.bass_power * BASS_WEIGHT
            + self.mid_power * MID_WEIGHT
            + self.treble_power * TREBLE_WEIGHT;
        self.overall_power = (weighted / 3.0).clamp(0.0, 1.0);
    }
}

/// Index ranges for one spectrum length and sample rate.
#[derive(Debug, Clone, PartialEq)]
struct BandLayout {
    len: usize,
    sample_rate: u32,
    low: Range<usize>,
    mid: Range<usize>,
    high: Range<usize>,
    detail: Vec<Range<usize>>,
}

impl BandLayout {
    fn new(len: usize, sample_rate: u32, detail_count: usize) -> Self {
        let edge = |per_mille: usize| len * per_mille / 1000;

        let nyquist = sample_rate as f32 * 0.5;
        let min_hz = MIN_DETAIL_HZ.min(nyquist * 0.5);
        let ratio = nyquist / min_hz;
        let to_index = |hz: f32| ((hz / nyquist) * len as f32).floor() as usize;

        let detail = (0..detail_count)
            .map(|band| {
                let lo_hz = min_hz * ratio.powf(band as f32 / detail_count as f32);
                let hi_hz = min_hz * ratio.powf((band + 1) as f32 / detail_count as f32);
                let start = to_index(lo_hz).min(len - 1);
                let end = to_index(hi_hz).clamp(start + 1, len);
                start..end
            })
            .collect();

        Self {
            len,
            sample_rate,
            low: 0..edge(LOW_BAND_END),
            mid: edge(LOW_BAND_END)..edge(MID_BAND_END),
            high: edge(MID_BAND_END)..edge(HIGH_BAND_END),
            detail,
        }
    }

    fn matches(&self, len: usize, sample_rate: u32) -> bool {
        self.len == len && self.sample_rate == sample_rate
    }
}

/// Turns spectrum frames into smoothed band powers.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    band: AdaptiveSmoother,
    detail: AdaptiveSmoother,
    detail_count: usize,
    decay_factor: f32,
    layout: Option<BandLayout>,
}

impl FeatureExtractor {
    pub fn new(config: &ConnectorConfig) -> Self {
        let band = AdaptiveSmoother::new(config.smoothing.rise, config.smoothing.fall);
        Self {
            band,
            detail: band.scaled(
                config.smoothing.detail_rise_scale,
                config.smoothing.detail_fall_scale,
            ),
            detail_count: config.detail_bands,
            decay_factor: config.decay_factor,
            layout: None,
        }
    }

    /// Smooths coarse and detail bands of `frame` into `state` and refreshes
    /// the overall power. Empty frames take the decay path instead.
    pub fn extract(&mut self, frame: &SpectrumFrame, sample_rate: u32, state: &mut FeatureState) {
        if frame.is_empty() {
            self.decay(state);
            return;
        }

        let values = frame.magnitudes();
        if let Some(layout) = &self.layout {
            if !layout.matches(values.len(), sample_rate) {
                self.layout = None;
            }
        }
        let detail_count = self.detail_count;
        let layout = self
            .layout
            .get_or_insert_with(|| BandLayout::new(values.len(), sample_rate, detail_count));

        self.band.apply(&mut state.bass_power, band_average(&values[layout.low.clone()]));
        self.band.apply(&mut state.mid_power, band_average(&values[layout.mid.clone()]));
        self.band.apply(&mut state.treble_power, band_average(&values[layout.high.clone()]));
        for power in [&mut state.bass_power, &mut state.mid_power, &mut state.treble_power] {
            *power = power.clamp(0.0, 1.0);
        }

        for (band, range) in state.detail_bands.iter_mut().zip(&layout.detail) {
            let target = band_average(&values[range.clone()]);
            *band = self.detail.step(*band, target).clamp(0.0, 1.0);
        }

        state.update_overall();
    }

    /// Pulls every feature a fixed fraction toward zero and drops the beat
    /// flag. Used while no spectrum is available.
    pub fn decay(&self, state: &mut FeatureState) {
        let factor = self.decay_factor;
        state.bass_power *= factor;
        state.mid_power *= factor;
        state.treble_power *= factor;
        state.overall_power *= factor;
        state.bass_impact *= factor;
        for band in &mut state.detail_bands {
            *band *= factor;
        }
        state.beat.clear_beat();
        state.peak.skip_frame();
    }
}

/// Extraction plus beat and peak detection, one call per tick.
#[derive(Debug, Clone)]
pub struct AnalysisEngine {
    extractor: FeatureExtractor,
    state: FeatureState,
    summary: AnalysisSummary,
}

impl AnalysisEngine {
    pub fn new(config: &ConnectorConfig) -> Self {
        Self {
            extractor: FeatureExtractor::new(config),
            state: FeatureState::new(config),
            summary: AnalysisSummary::default(),
        }
    }

    pub fn state(&self) -> &FeatureState {
        &self.state
    }

    pub fn summary(&self) -> &AnalysisSummary {
        &self.summary
    }

    /// Clears every feature, detector and counter.
    pub fn reset(&mut self) {
        self.state.reset();
        self.summary = AnalysisSummary::default();
    }

    /// Runs one tick. `None` and empty frames decay the state.
    pub fn process(
        &mut self,
        frame: Option<&SpectrumFrame>,
        sample_rate: u32,
        now: Duration,
    ) -> &FeatureState {
        self.summary.ticks += 1;

        let Some(frame) = frame.filter(|frame| !frame.is_empty()) else {
            self.extractor.decay(&mut self.state);
            self.summary.idle_ticks += 1;
            return &self.state;
        };

        self.extractor.extract(frame, sample_rate, &mut self.state);

        let state = &mut self.state;
        if state.beat.process(state.bass_power, now) {
            self.summary.beats += 1;
            self.summary.tempo_bpm = state.beat.tempo_bpm();
        }

        let raw_impact = state.peak.process(state.bass_power, state.beat.mean());
        if raw_impact > 0.0 {
            self.summary.peaks += 1;
        }
        state.bass_impact = state.peak.smooth_impact(state.bass_impact, raw_impact);

        &self.state
    }
}

fn band_average(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AnalysisEngine {
        AnalysisEngine::new(&ConnectorConfig::default())
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    /// Length-100 frame with the low 8% silent and everything else at 255.
    fn bright_frame() -> SpectrumFrame {
        let mut bytes = vec![0u8; 8];
        bytes.extend(std::iter::repeat(255u8).take(92));
        SpectrumFrame::from_bytes(&bytes)
    }

    /// Bass-only frame for a spectrum of `len` bins.
    fn kick_frame(len: usize, level: f32) -> SpectrumFrame {
        let low = len * 8 / 100;
        let mut values = vec![0.0; len];
        values[..low].fill(level);
        SpectrumFrame::new(values)
    }

    #[test]
    fn coarse_layout_follows_fractions() {
        let layout = BandLayout::new(100, 48_000, 24);
        assert_eq!(layout.low, 0..8);
        assert_eq!(layout.mid, 8..40);
        assert_eq!(layout.high, 40..90);
    }

    #[test]
    fn detail_ranges_are_log_spaced_and_non_empty() {
        let layout = BandLayout::new(1024, 48_000, 24);
        assert_eq!(layout.detail.len(), 24);
        for range in &layout.detail {
            assert!(range.start < range.end);
            assert!(range.end <= 1024);
        }
        let first = layout.detail[0].len();
        let last = layout.detail[23].len();
        assert!(last > first * 10);
        assert_eq!(layout.detail[23].end, 1024);
    }

    #[test]
    fn single_tick_moves_bands_by_rise_factor() {
        let mut engine = engine();
        let state = engine.process(Some(&bright_frame()), 48_000, ms(0));

        assert_eq!(state.bass_power, 0.0);
        assert!((state.mid_power - 0.3).abs() < 1e-6);
        assert!((state.treble_power - 0.3).abs() < 1e-6);
        let expected = (0.3 * 1.0 + 0.3 * 0.9) / 3.0;
        assert!((state.overall_power - expected).abs() < 1e-6);
    }

    #[test]
    fn detail_bands_use_slower_rise() {
        let mut engine = engine();
        let frame = SpectrumFrame::new(vec![1.0; 512]);
        let state = engine.process(Some(&frame), 48_000, ms(0));
        for band in state.detail_bands() {
            assert!((band - 0.36).abs() < 1e-6);
        }
    }

    #[test]
    fn layout_follows_spectrum_size_changes() {
        let mut engine = engine();
        engine.process(Some(&bright_frame()), 48_000, ms(0));

        // 8% of 200 bins is 16; the bright part now reaches into the low band
        let mut bytes = vec![0u8; 8];
        bytes.extend(std::iter::repeat(255u8).take(192));
        let wider = SpectrumFrame::from_bytes(&bytes);
        let state = engine.process(Some(&wider), 44_100, ms(16));

        assert!((state.bass_power - 0.3 * 0.5).abs() < 1e-6);
        assert_eq!(state.detail_bands().len(), 24);
        assert!(state.detail_bands()[23] > 0.0);
    }

    #[test]
    fn nan_samples_zero_the_affected_band() {
        let mut engine = engine();
        engine.process(Some(&SpectrumFrame::new(vec![1.0; 100])), 48_000, ms(0));
        let mut values = vec![1.0; 100];
        values[2] = f32::NAN;
        let state = engine.process(Some(&SpectrumFrame::new(values)), 48_000, ms(16));

        assert_eq!(state.bass_power, 0.0);
        assert!(state.mid_power > 0.3);
        assert!(state.overall_power.is_finite());
    }

    #[test]
    fn absent_input_decays_everything_monotonically() {
        let mut engine = engine();
        for tick in 0..10 {
            engine.process(Some(&kick_frame(200, 1.0)), 48_000, ms(tick * 16));
        }
        assert!(engine.state().bass_impact > 0.0);

        let mut previous = engine.state().clone();
        for tick in 10..400 {
            let frame = if tick % 2 == 0 { None } else { Some(SpectrumFrame::default()) };
            let state = engine.process(frame.as_ref(), 48_000, ms(tick * 16));
            assert!(!state.is_beat());
            assert!(state.bass_power < previous.bass_power);
            assert!(state.overall_power <= previous.overall_power);
            assert!(state.bass_impact < previous.bass_impact);
            for (now, before) in state.detail_bands().iter().zip(previous.detail_bands()) {
                assert!(now <= before);
            }
            previous = state.clone();
        }
        assert!(previous.bass_power < 0.05);
        assert_eq!(engine.summary().idle_ticks, 390);
    }

    #[test]
    fn close_transients_produce_one_beat() {
        let mut engine = engine();
        let kick = kick_frame(200, 1.0);
        let silence = kick_frame(200, 0.0);

        let mut beats = 0;
        for (at, frame) in [(0, &kick), (16, &silence), (33, &silence), (50, &kick)] {
            if engine.process(Some(frame), 48_000, ms(at)).is_beat() {
                beats += 1;
            }
        }
        assert_eq!(beats, 1);
        assert_eq!(engine.summary().beats, 1);
    }

    #[test]
    fn impact_rises_within_a_tick_then_fades() {
        let mut engine = engine();
        let state = engine.process(Some(&kick_frame(200, 1.0)), 48_000, ms(0));
        assert_eq!(state.peak.last_peak(), Some(1));
        let first = state.bass_impact;
        assert!(first > 0.0);

        let silence = kick_frame(200, 0.0);
        let mut previous = first;
        for tick in 1..20 {
            let state = engine.process(Some(&silence), 48_000, ms(tick * 16));
            assert!(state.bass_impact > 0.0);
            assert!(state.bass_impact < previous);
            previous = state.bass_impact;
        }
        assert_eq!(engine.summary().peaks, 1);
    }

    #[test]
    fn reset_clears_features_and_counters() {
        let mut engine = engine();
        engine.process(Some(&bright_frame()), 48_000, ms(0));
        engine.reset();

        let state = engine.state();
        assert_eq!(state.mid_power, 0.0);
        assert!(state.detail_bands().iter().all(|band| *band == 0.0));
        assert_eq!(state.detail_bands().len(), 24);
        assert_eq!(engine.summary(), &AnalysisSummary::default());
    }
}
