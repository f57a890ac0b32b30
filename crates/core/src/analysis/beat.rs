use std::time::Duration;

use tracing::debug;

use crate::config::BeatConfig;

const MAX_BEAT_HISTORY: usize = 32;
/// Intervals longer than this are gaps in the music, not beats.
const MAX_TEMPO_INTERVAL: Duration = Duration::from_secs(2);

/// Energy beat detector with a cutoff that follows the variance of the
/// recent bass history.
///
/// Loud passages with little movement get a cutoff close to their mean, busy
/// passages get more headroom. The cutoff never drops below a floor, which
/// keeps silence from firing beats.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    config: BeatConfig,
    history: Vec<f32>,
    write: usize,
    mean: f32,
    variance: f32,
    cutoff: f32,
    last_beat: Option<Duration>,
    is_beat: bool,
    beat_timestamps: Vec<Duration>,
    tempo_bpm: Option<f32>,
}

impl BeatDetector {
    pub fn new(config: BeatConfig) -> Self {
        Self {
            history: vec![0.0; config.history_size.max(1)],
            write: 0,
            mean: 0.0,
            variance: 0.0,
            cutoff: config.cutoff_floor,
            last_beat: None,
            is_beat: false,
            beat_timestamps: Vec::new(),
            tempo_bpm: None,
            config,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    /// Records one smoothed bass sample taken at `now` and reports whether it
    /// is a beat. The flag only stays set until the next call.
    pub fn process(&mut self, bass_power: f32, now: Duration) -> bool {
        self.history[self.write] = bass_power;
        self.write = (self.write + 1) % self.history.len();

        let len = self.history.len() as f32;
        self.mean = self.history.iter().sum::<f32>() / len;
        self.variance = self
            .history
            .iter()
            .map(|energy| (energy - self.mean).powi(2))
            .sum::<f32>()
            / len;

        let coefficient =
            self.config.variance_slope * self.variance + self.config.variance_intercept;
        self.cutoff = (coefficient * self.mean).max(self.config.cutoff_floor);

        let rested = self
            .last_beat
            .map(|last| now.saturating_sub(last) >= self.config.min_interval())
            .unwrap_or(true);

        self.is_beat = bass_power > self.cutoff && rested;
        if self.is_beat {
            debug!(
                bass_power,
                cutoff = self.cutoff,
                at_ms = now.as_millis() as u64,
                "beat"
            );
            self.last_beat = Some(now);
            self.record_beat(now);
        }

        self.is_beat
    }

    /// Drops the beat flag without touching the history, for ticks that had
    /// no spectrum to analyse.
    pub fn clear_beat(&mut self) {
        self.is_beat = false;
    }

    pub fn is_beat(&self) -> bool {
        self.is_beat
    }

    /// Rolling mean of the energy history, as of the last processed sample.
    pub fn mean(&self) -> f32 {
        self.mean
    }

    pub fn variance(&self) -> f32 {
        self.variance
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    pub fn last_beat(&self) -> Option<Duration> {
        self.last_beat
    }

    pub fn tempo_bpm(&self) -> Option<f32> {
        self.tempo_bpm
    }

    fn record_beat(&mut self, now: Duration) {
        self.beat_timestamps.push(now);
        if self.beat_timestamps.len() > MAX_BEAT_HISTORY {
            let overflow = self.beat_timestamps.len() - MAX_BEAT_HISTORY;
            self.beat_timestamps.drain(0..overflow);
        }
        self.update_tempo_estimate();
    }

    fn update_tempo_estimate(&mut self) {
        if self.beat_timestamps.len() < 2 {
            return;
        }

        let mut sum = Duration::ZERO;
        let mut count = 0u32;
        for window in self.beat_timestamps.windows(2) {
            let interval = window[1].saturating_sub(window[0]);
            if !interval.is_zero() && interval <= MAX_TEMPO_INTERVAL {
                sum += interval;
                count += 1;
            }
        }

        if count > 0 {
            let average = sum.as_secs_f32() / count as f32;
            if average > 0.0 {
                self.tempo_bpm = Some(60.0 / average);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn silence_never_beats() {
        let mut detector = BeatDetector::new(BeatConfig::default());
        for tick in 0..200 {
            assert!(!detector.process(0.0, ms(tick * 16)));
        }
        assert_eq!(detector.cutoff(), 0.1);
    }

    #[test]
    fn quiet_signal_stays_under_the_floor() {
        let mut detector = BeatDetector::new(BeatConfig::default());
        for tick in 0..100 {
            assert!(!detector.process(0.09, ms(tick * 16)));
        }
    }

    #[test]
    fn beat_flag_lasts_one_call() {
        let mut detector = BeatDetector::new(BeatConfig::default());
        assert!(detector.process(0.8, ms(0)));
        assert!(detector.is_beat());
        assert!(!detector.process(0.0, ms(16)));
        assert!(!detector.is_beat());
    }

    #[test]
    fn refractory_interval_suppresses_close_beats() {
        let mut detector = BeatDetector::new(BeatConfig::default());
        assert!(detector.process(0.8, ms(1_000)));
        assert!(!detector.process(0.0, ms(1_016)));
        // qualifies on energy, but only 50 ms after the last beat
        assert!(!detector.process(0.8, ms(1_050)));
        assert_eq!(detector.last_beat(), Some(ms(1_000)));

        assert!(!detector.process(0.0, ms(1_100)));
        assert!(detector.process(0.9, ms(1_250)));
        assert_eq!(detector.last_beat(), Some(ms(1_250)));
    }

    #[test]
    fn sustained_loudness_raises_the_cutoff() {
        let mut detector = BeatDetector::new(BeatConfig::default());
        for tick in 0..43 {
            detector.process(0.6, ms(tick * 16));
        }
        assert!(detector.variance() < 1e-6);
        assert!((detector.mean() - 0.6).abs() < 1e-5);
        // steady energy sits below its own cutoff
        assert!(detector.cutoff() > 0.6);
        assert!(!detector.process(0.6, ms(10_000)));
    }

    #[test]
    fn estimates_tempo_from_regular_beats() {
        let mut detector = BeatDetector::new(BeatConfig::default());
        for beat in 0..8u64 {
            let start = beat * 500;
            assert!(detector.process(0.9, ms(start)));
            for quiet in 1..5 {
                detector.process(0.0, ms(start + quiet * 100));
            }
        }

        let tempo = detector.tempo_bpm().expect("tempo should be detected");
        assert!((tempo - 120.0).abs() < 1.0);
    }

    #[test]
    fn reset_restores_construction_state() {
        let mut detector = BeatDetector::new(BeatConfig::default());
        detector.process(0.9, ms(0));
        detector.reset();
        assert_eq!(detector.last_beat(), None);
        assert_eq!(detector.mean(), 0.0);
        assert!(!detector.is_beat());
    }
}
