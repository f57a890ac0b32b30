use std::{fmt, time::Duration};

use tracing::{error, info, warn};

use crate::{
    analysis::{AnalysisEngine, AnalysisSummary, FeatureState},
    config::{AppConfig, ConnectorConfig},
    mapping::{ParameterMapper, ParameterSnapshot},
    mood::{MoodCatalog, MoodProfile, DEFAULT_MOOD},
    ConnectorError, Result, SpectrumSource,
};

/// Service object owning the whole analysis pipeline.
///
/// [`Connector::tick`] pulls one spectrum from the installed source, runs
/// extraction, beat and peak detection, and replaces the published
/// [`ParameterSnapshot`]. It has no timing of its own; a
/// [`TickDriver`](crate::TickDriver), a frame callback or a test can drive it.
pub struct Connector {
    config: ConnectorConfig,
    analysis: AnalysisEngine,
    mapper: ParameterMapper,
    moods: MoodCatalog,
    mood: MoodProfile,
    source: Option<Box<dyn SpectrumSource>>,
    sample_rate: u32,
    snapshot: ParameterSnapshot,
}

impl Connector {
    /// Creates a connector with the built-in mood catalog.
    pub fn new(config: ConnectorConfig) -> Result<Self> {
        Self::with_moods(config, MoodCatalog::builtin())
    }

    pub fn with_moods(config: ConnectorConfig, moods: MoodCatalog) -> Result<Self> {
        config.validate()?;
        let mood = moods.get(DEFAULT_MOOD).cloned().unwrap_or_default();
        Ok(Self {
            analysis: AnalysisEngine::new(&config),
            mapper: ParameterMapper::new(),
            snapshot: ParameterSnapshot::defaults(config.detail_bands),
            moods,
            mood,
            source: None,
            sample_rate: 0,
            config,
        })
    }

    /// Builds a connector from a full configuration, extra moods included.
    pub fn from_app_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let moods = MoodCatalog::with_profiles(config.moods.iter().cloned());
        Self::with_moods(config.connector.clone(), moods)
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn moods(&self) -> &MoodCatalog {
        &self.moods
    }

    /// Profile currently feeding the mapper.
    pub fn mood(&self) -> &MoodProfile {
        &self.mood
    }

    /// Switches the active mood. Unknown keys select the default profile.
    /// Feature state is left alone. Returns whether `key` was known.
    pub fn set_mood(&mut self, key: &str) -> bool {
        let previous = self.mood.key.clone();
        let known = match self.moods.get(key) {
            Some(profile) => {
                self.mood = profile.clone();
                true
            }
            None => {
                warn!(mood = key, fallback = DEFAULT_MOOD, "unknown mood, using default");
                self.mood = self.moods.get(DEFAULT_MOOD).cloned().unwrap_or_default();
                false
            }
        };
        info!(from = %previous, to = %self.mood.key, "mood changed");
        known
    }

    /// Installs the spectrum collaborator.
    ///
    /// A source that cannot report its sample rate is rejected: the previous
    /// source is dropped as well and the connector keeps decaying until a
    /// valid one is installed.
    pub fn set_spectrum_source<S>(&mut self, source: S) -> Result<()>
    where
        S: SpectrumSource + 'static,
    {
        let sample_rate = source.sample_rate();
        if sample_rate == 0 {
            error!("rejected spectrum source without a sample rate");
            self.source = None;
            self.sample_rate = 0;
            return Err(ConnectorError::InvalidSource(
                "source reports a sample rate of 0 Hz".to_string(),
            ));
        }

        info!(sample_rate, "spectrum source attached");
        self.source = Some(Box::new(source));
        self.sample_rate = sample_rate;
        Ok(())
    }

    pub fn clear_spectrum_source(&mut self) {
        self.source = None;
        self.sample_rate = 0;
    }

    pub fn has_spectrum_source(&self) -> bool {
        self.source.is_some()
    }

    /// Runs one pipeline pass at `now`, measured from any fixed origin.
    ///
    /// On error nothing has been modified yet; callers decide whether to
    /// [`reset`](Self::reset).
    pub fn tick(&mut self, now: Duration) -> Result<&ParameterSnapshot> {
        let frame = match self.source.as_mut() {
            Some(source) => source.fetch()?,
            None => None,
        };

        let state = self
            .analysis
            .process(frame.as_ref(), self.sample_rate, now);
        self.snapshot = self.mapper.map(state, Some(&self.mood));
        Ok(&self.snapshot)
    }

    /// Owned copy of the latest snapshot.
    pub fn parameters(&self) -> ParameterSnapshot {
        self.snapshot.clone()
    }

    pub fn features(&self) -> &FeatureState {
        self.analysis.state()
    }

    pub fn summary(&self) -> AnalysisSummary {
        *self.analysis.summary()
    }

    /// Discards all smoothing history and republishes the default snapshot.
    pub fn reset(&mut self) {
        self.analysis.reset();
        self.snapshot = ParameterSnapshot::defaults(self.config.detail_bands);
    }

    /// Releases the source and clears all state.
    pub fn dispose(&mut self) {
        self.clear_spectrum_source();
        self.reset();
        info!("connector disposed");
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("mood", &self.mood.key)
            .field("has_source", &self.source.is_some())
            .field("sample_rate", &self.sample_rate)
            .field("summary", self.analysis.summary())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use super::*;
    use crate::{AnalyserSource, SpectrumFrame};

    /// Replays scripted frames, then reports nothing.
    struct Scripted {
        sample_rate: u32,
        frames: VecDeque<Result<Option<SpectrumFrame>>>,
    }

    impl Scripted {
        fn new(frames: Vec<Result<Option<SpectrumFrame>>>) -> Self {
            Self {
                sample_rate: 48_000,
                frames: frames.into(),
            }
        }
    }

    impl SpectrumSource for Scripted {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn fetch(&mut self) -> Result<Option<SpectrumFrame>> {
            self.frames.pop_front().unwrap_or(Ok(None))
        }
    }

    fn connector() -> Connector {
        Connector::new(ConnectorConfig::default()).unwrap()
    }

    fn bright_frame() -> SpectrumFrame {
        let mut bytes = vec![0u8; 8];
        bytes.extend(std::iter::repeat(255u8).take(92));
        SpectrumFrame::from_bytes(&bytes)
    }

    #[test]
    fn starts_with_default_snapshot() {
        let connector = connector();
        let snapshot = connector.parameters();
        assert_eq!(snapshot, ParameterSnapshot::defaults(24));
        assert_eq!(snapshot.global_intensity, 1.0);
        assert!(!snapshot.is_beat);
        assert_eq!(connector.mood().key, DEFAULT_MOOD);
    }

    #[test]
    fn ticks_without_source_decay_quietly() {
        let mut connector = connector();
        for tick in 0..30 {
            let snapshot = connector.tick(Duration::from_millis(tick * 16)).unwrap();
            assert!(!snapshot.is_beat);
            assert_eq!(snapshot.bass_impact, 0.0);
        }
        assert_eq!(connector.summary().idle_ticks, 30);
    }

    #[test]
    fn rejects_source_without_sample_rate() {
        let mut connector = connector();
        connector
            .set_spectrum_source(Scripted::new(Vec::new()))
            .unwrap();
        assert!(connector.has_spectrum_source());

        let mut broken = Scripted::new(Vec::new());
        broken.sample_rate = 0;
        let err = connector.set_spectrum_source(broken).unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidSource(_)));
        assert!(!connector.has_spectrum_source());

        // still ticks on the decay path
        connector.tick(Duration::ZERO).unwrap();
    }

    #[test]
    fn end_to_end_tick_moves_bands_toward_input() {
        let mut connector = connector();
        connector
            .set_spectrum_source(Scripted::new(vec![Ok(Some(bright_frame()))]))
            .unwrap();

        connector.tick(Duration::ZERO).unwrap();
        let features = connector.features();
        assert_eq!(features.bass_power, 0.0);
        assert!((features.mid_power - 0.3).abs() < 1e-6);
        assert!((features.treble_power - 0.3).abs() < 1e-6);

        let snapshot = connector.parameters();
        assert!(snapshot.global_intensity > 0.7);
        assert_eq!(snapshot.detail_bands.len(), 24);
    }

    #[test]
    fn parameters_are_a_detached_copy() {
        let mut connector = connector();
        let mut copy = connector.parameters();
        copy.detail_bands[0] = 1.0;
        copy.glow = 99.0;
        assert_eq!(connector.parameters(), ParameterSnapshot::defaults(24));

        connector.tick(Duration::ZERO).unwrap();
        assert_eq!(copy.glow, 99.0);
    }

    #[test]
    fn failed_fetch_leaves_state_untouched() {
        let mut connector = connector();
        connector
            .set_spectrum_source(Scripted::new(vec![
                Ok(Some(bright_frame())),
                Err(ConnectorError::msg("device unplugged")),
            ]))
            .unwrap();

        let before = connector.tick(Duration::ZERO).unwrap().clone();
        assert!(connector.tick(Duration::from_millis(16)).is_err());
        assert_eq!(connector.parameters(), before);
        assert_eq!(connector.summary().ticks, 1);
    }

    #[test]
    fn mood_switch_keeps_features() {
        let mut connector = connector();
        connector
            .set_spectrum_source(Scripted::new(vec![Ok(Some(bright_frame()))]))
            .unwrap();
        connector.tick(Duration::ZERO).unwrap();
        let mid = connector.features().mid_power;

        assert!(connector.set_mood("dreamy"));
        assert_eq!(connector.mood().key, "dreamy");
        assert_eq!(connector.features().mid_power, mid);

        assert!(!connector.set_mood("no-such-mood"));
        assert_eq!(connector.mood().key, DEFAULT_MOOD);
    }

    #[test]
    fn reset_and_dispose_restore_defaults() {
        let mut connector = connector();
        connector
            .set_spectrum_source(Scripted::new(
                (0..5).map(|_| Ok(Some(bright_frame()))).collect(),
            ))
            .unwrap();
        for tick in 0..5 {
            connector.tick(Duration::from_millis(tick * 16)).unwrap();
        }
        assert_ne!(connector.parameters(), ParameterSnapshot::defaults(24));

        connector.reset();
        assert_eq!(connector.parameters(), ParameterSnapshot::defaults(24));
        assert!(connector.has_spectrum_source());

        connector.dispose();
        assert!(!connector.has_spectrum_source());
        assert_eq!(connector.summary(), AnalysisSummary::default());
    }

    #[test]
    fn analyser_source_drives_bass_from_low_tone() {
        let source = Arc::new(Mutex::new(AnalyserSource::new(48_000).unwrap()));
        let mut connector = connector();
        connector.set_spectrum_source(Arc::clone(&source)).unwrap();

        let tone: Vec<f32> = (0..2048)
            .map(|n| 0.8 * (2.0 * std::f32::consts::PI * 60.0 * n as f32 / 48_000.0).sin())
            .collect();
        source.lock().unwrap().push_samples(&tone);
        connector.tick(Duration::ZERO).unwrap();

        let features = connector.features();
        assert!(features.bass_power > 0.01);
        assert!(features.treble_power < 0.01);
        assert!(features.bass_power > features.treble_power);
    }

    #[test]
    fn loads_extra_moods_from_config() {
        let config = AppConfig::from_json_str(
            r#"{ "moods": [ { "key": "storm", "speed": 2.0 } ] }"#,
        )
        .unwrap();
        let mut connector = Connector::from_app_config(&config).unwrap();
        assert!(connector.set_mood("storm"));
        assert_eq!(connector.mood().speed, 2.0);
    }

    #[test]
    fn unnamed_config_mood_is_rejected() {
        let mut config = AppConfig::live_defaults();
        config.moods.push(MoodProfile {
            key: String::new(),
            speed: 2.4,
            ..MoodProfile::default()
        });
        let err = Connector::from_app_config(&config).unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));
    }
}
