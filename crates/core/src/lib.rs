//! Core library for the audio-visual connector.
//!
//! The connector turns a streaming magnitude spectrum into a small set of
//! smoothed features (band powers, beats, bass impacts) and fans those out
//! into named, clamped control parameters. Renderers and synthesisers read
//! the resulting [`ParameterSnapshot`] instead of running their own analysis.
//! Each module owns one stage of that pipeline; [`Connector`] ties them
//! together and [`TickDriver`] runs it at a fixed cadence.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod connector;
pub mod error;
pub mod mapping;
pub mod mood;
pub mod timeline;

pub use analysis::{
    AdaptiveSmoother, AnalysisEngine, AnalysisSummary, BeatDetector, FeatureExtractor,
    FeatureState, PeakDetector,
};
pub use audio::{AnalyserSettings, AnalyserSource, SpectrumFrame, SpectrumSource};
pub use config::{AppConfig, BeatConfig, ConnectorConfig, PeakConfig, SmoothingConfig};
pub use connector::Connector;
pub use error::{ConnectorError, Result};
pub use mapping::{ParameterMapper, ParameterRange, ParameterSnapshot};
pub use mood::{MoodCatalog, MoodProfile, DEFAULT_MOOD};
pub use timeline::{DriverHandle, DriverStats, PlaybackClock, TickDriver, TickOutcome};
