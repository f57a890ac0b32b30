use std::{
    f32::consts::PI,
    fmt,
    sync::{Arc, Mutex},
};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{ConnectorError, Result};

/// One tick's worth of normalized spectrum magnitudes, ordered from DC up to
/// the Nyquist frequency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectrumFrame {
    magnitudes: Vec<f32>,
}

impl SpectrumFrame {
    /// Wraps normalized magnitudes. Finite values are clamped into [0, 1];
    /// NaN is kept so the smoother can discard it.
    pub fn new(magnitudes: Vec<f32>) -> Self {
        let magnitudes = magnitudes
            .into_iter()
            .map(|value| if value.is_nan() { value } else { value.clamp(0.0, 1.0) })
            .collect();
        Self { magnitudes }
    }

    /// Builds a frame from byte magnitudes where 255 is full scale.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            magnitudes: bytes.iter().map(|&b| f32::from(b) / 255.0).collect(),
        }
    }

    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }
}

/// Supplier of one spectrum frame per tick.
///
/// Returning `Ok(None)` (or an empty frame) means no data is available this
/// tick and puts the connector on its decay path. Errors are treated as a
/// failed tick.
pub trait SpectrumSource: Send {
    /// Effective sample rate of the analysed signal. Zero is rejected when the
    /// source is installed, since detail bands are placed relative to Nyquist.
    fn sample_rate(&self) -> u32;

    fn fetch(&mut self) -> Result<Option<SpectrumFrame>>;
}

impl<S: SpectrumSource + ?Sized> SpectrumSource for Box<S> {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn fetch(&mut self) -> Result<Option<SpectrumFrame>> {
        (**self).fetch()
    }
}

/// Lets a producer thread keep pushing into a source while the tick driver
/// pulls from it.
impl<S: SpectrumSource> SpectrumSource for Arc<Mutex<S>> {
    fn sample_rate(&self) -> u32 {
        self.lock().map(|source| source.sample_rate()).unwrap_or(0)
    }

    fn fetch(&mut self) -> Result<Option<SpectrumFrame>> {
        self.lock()
            .map_err(|_| ConnectorError::Poisoned("spectrum source"))?
            .fetch()
    }
}

/// Settings mirroring a browser-style analyser node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserSettings {
    pub fft_size: usize,
    pub min_decibels: f32,
    pub max_decibels: f32,
    /// Weight of the previous magnitude when blending in a new block.
    pub smoothing_time_constant: f32,
}

impl Default for AnalyserSettings {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            min_decibels: -100.0,
            max_decibels: -30.0,
            smoothing_time_constant: 0.8,
        }
    }
}

/// Spectrum source that analyses pushed mono PCM.
///
/// The newest `fft_size` samples are Hann-windowed, transformed with a real
/// FFT, blended with the previous magnitudes and mapped from decibels onto
/// [0, 1]. Frames have `fft_size / 2` bins.
pub struct AnalyserSource {
    sample_rate: u32,
    settings: AnalyserSettings,
    history: Vec<f32>,
    write: usize,
    filled: usize,
    fresh: usize,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    fft: FftResources,
}

impl AnalyserSource {
    pub fn new(sample_rate: u32) -> Result<Self> {
        Self::with_settings(sample_rate, AnalyserSettings::default())
    }

    pub fn with_settings(sample_rate: u32, settings: AnalyserSettings) -> Result<Self> {
        let size = settings.fft_size;
        if !size.is_power_of_two() || size < 32 {
            return Err(ConnectorError::InvalidInput(
                "analyser fft_size must be a power of two of at least 32",
            ));
        }
        if settings.max_decibels <= settings.min_decibels {
            return Err(ConnectorError::InvalidInput(
                "analyser max_decibels must exceed min_decibels",
            ));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);
        let fft = FftResources {
            size,
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        };

        Ok(Self {
            sample_rate,
            settings,
            history: vec![0.0; size],
            write: 0,
            filled: 0,
            fresh: 0,
            window: (0..size).map(|i| hann_value(i, size)).collect(),
            smoothed: vec![0.0; size / 2],
            fft,
        })
    }

    /// Number of bins in every produced frame.
    pub fn bin_count(&self) -> usize {
        self.settings.fft_size / 2
    }

    /// Appends mono samples. Only the newest `fft_size` are retained.
    pub fn push_samples(&mut self, samples: &[f32]) {
        let size = self.history.len();
        for &sample in samples {
            self.history[self.write] = if sample.is_finite() { sample } else { 0.0 };
            self.write = (self.write + 1) % size;
        }
        self.filled = (self.filled + samples.len()).min(size);
        self.fresh += samples.len();
    }

    fn analyse(&mut self) -> Result<SpectrumFrame> {
        let size = self.fft.size;
        for i in 0..size {
            let sample = self.history[(self.write + i) % size];
            self.fft.input[i] = sample * self.window[i];
        }

        self.fft.plan.process_with_scratch(
            &mut self.fft.input,
            &mut self.fft.spectrum,
            &mut self.fft.scratch,
        )?;

        let tau = self.settings.smoothing_time_constant.clamp(0.0, 1.0);
        let range = self.settings.max_decibels - self.settings.min_decibels;
        let scale = 1.0 / size as f32;

        let mut magnitudes = Vec::with_capacity(self.smoothed.len());
        for (previous, bin) in self.smoothed.iter_mut().zip(&self.fft.spectrum) {
            *previous = tau * *previous + (1.0 - tau) * bin.norm() * scale;
            let value = if *previous > 0.0 {
                let db = 20.0 * previous.log10();
                ((db - self.settings.min_decibels) / range).clamp(0.0, 1.0)
            } else {
                0.0
            };
            magnitudes.push(value);
        }

        Ok(SpectrumFrame { magnitudes })
    }
}

impl SpectrumSource for AnalyserSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Yields `None` until a full window has been pushed and whenever no new
    /// samples arrived since the previous fetch.
    fn fetch(&mut self) -> Result<Option<SpectrumFrame>> {
        if self.filled < self.history.len() || self.fresh == 0 {
            return Ok(None);
        }
        self.fresh = 0;
        self.analyse().map(Some)
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for AnalyserSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyserSource")
            .field("sample_rate", &self.sample_rate)
            .field("settings", &self.settings)
            .field("filled", &self.filled)
            .field("fft", &self.fft)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
