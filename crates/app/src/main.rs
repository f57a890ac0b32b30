mod decode;

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use av_connector_core::{
    AnalyserSource, AppConfig, Connector, ConnectorError, TickDriver, DEFAULT_MOOD,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> av_connector_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyse { input, mood, every } => run_analyse(&config, &input, &mood, every),
        Commands::Play {
            input,
            mood,
            report_ms,
        } => run_play(&config, &input, &mood, report_ms),
        Commands::Moods => list_moods(&config),
    }
}

fn run_analyse(
    config: &AppConfig,
    input: &Path,
    mood: &str,
    every: usize,
) -> av_connector_core::Result<()> {
    tracing::info!(?input, mood, "running offline analysis");

    let audio = decode::decode_file(input)?;
    let (mut connector, source) = build_connector(config, audio.sample_rate, mood)?;

    let interval = connector.config().tick_interval();
    let block = samples_per_tick(audio.sample_rate, interval);
    let every = every.max(1);

    for (tick, chunk) in audio.samples.chunks(block).enumerate() {
        source
            .lock()
            .map_err(|_| ConnectorError::Poisoned("spectrum source"))?
            .push_samples(chunk);

        let now = interval * tick as u32;
        let snapshot = connector.tick(now)?;
        if tick % every == 0 {
            let line = serde_json::json!({
                "tick": tick,
                "time": now.as_secs_f64(),
                "parameters": snapshot,
            });
            println!("{line}");
        }
    }

    let summary = connector.summary();
    tracing::info!(
        ticks = summary.ticks,
        beats = summary.beats,
        peaks = summary.peaks,
        tempo_bpm = ?summary.tempo_bpm,
        "analysis finished"
    );
    Ok(())
}

fn run_play(
    config: &AppConfig,
    input: &Path,
    mood: &str,
    report_ms: u64,
) -> av_connector_core::Result<()> {
    tracing::info!(?input, mood, "starting real-time playback");

    let audio = decode::decode_file(input)?;
    let sample_rate = audio.sample_rate;
    let (connector, source) = build_connector(config, sample_rate, mood)?;

    let mut driver = TickDriver::new(connector);
    let handle = driver.handle();
    let block = samples_per_tick(sample_rate, driver.interval());
    let block_duration = Duration::from_secs_f64(block as f64 / f64::from(sample_rate));
    let report_every = Duration::from_millis(report_ms.max(1));

    driver.start()?;
    let started = Instant::now();
    let mut next_report = report_every;

    for (index, chunk) in audio.samples.chunks(block).enumerate() {
        source
            .lock()
            .map_err(|_| ConnectorError::Poisoned("spectrum source"))?
            .push_samples(chunk);

        let due = block_duration * (index as u32 + 1);
        if let Some(wait) = due.checked_sub(started.elapsed()) {
            thread::sleep(wait);
        }

        if started.elapsed() >= next_report {
            next_report += report_every;
            let snapshot = handle.parameters();
            tracing::info!(
                t = started.elapsed().as_secs_f32(),
                intensity = snapshot.global_intensity,
                motion = snapshot.motion_speed,
                impact = snapshot.bass_impact,
                beat = snapshot.is_beat,
                tempo = snapshot.tempo_bpm,
                "parameters"
            );
        }
    }

    let summary = handle.summary();
    let stats = handle.stats();
    tracing::info!(
        beats = summary.beats,
        peaks = summary.peaks,
        completed = stats.completed,
        skipped = stats.skipped,
        recovered = stats.recovered,
        "playback finished"
    );
    driver.dispose();
    Ok(())
}

/// Wires a connector to a fresh analyser running at the decoded rate.
fn build_connector(
    config: &AppConfig,
    sample_rate: u32,
    mood: &str,
) -> av_connector_core::Result<(Connector, Arc<Mutex<AnalyserSource>>)> {
    let source = AnalyserSource::new(sample_rate)?;
    tracing::debug!(sample_rate, bins = source.bin_count(), "analyser ready");

    let source = Arc::new(Mutex::new(source));
    let mut connector = Connector::from_app_config(config)?;
    connector.set_mood(mood);
    connector.set_spectrum_source(Arc::clone(&source))?;
    Ok((connector, source))
}

fn list_moods(config: &AppConfig) -> av_connector_core::Result<()> {
    let connector = Connector::from_app_config(config)?;
    for key in connector.moods().keys() {
        if key == DEFAULT_MOOD {
            println!("{key} (default)");
        } else {
            println!("{key}");
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> av_connector_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::load(path)
        }
        None => Ok(AppConfig::live_defaults()),
    }
}

fn samples_per_tick(sample_rate: u32, interval: Duration) -> usize {
    ((f64::from(sample_rate) * interval.as_secs_f64()).round() as usize).max(1)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive parameter connector", long_about = None)]
struct Cli {
    /// JSON configuration file with connector tuning and extra moods.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyse an audio file as fast as possible and print snapshots as JSON lines.
    Analyse {
        /// Audio file (wav, flac, mp3, ogg, aac); the sample rate is read from it.
        input: PathBuf,
        #[arg(short, long, default_value = DEFAULT_MOOD)]
        mood: String,
        /// Print every Nth snapshot.
        #[arg(short, long, default_value_t = 1)]
        every: usize,
    },
    /// Feed an audio file in real time through the tick driver.
    Play {
        /// Audio file (wav, flac, mp3, ogg, aac); the sample rate is read from it.
        input: PathBuf,
        #[arg(short, long, default_value = DEFAULT_MOOD)]
        mood: String,
        /// How often to log the current parameters, in milliseconds.
        #[arg(short, long, default_value_t = 500)]
        report_ms: u64,
    },
    /// List the available mood keys.
    Moods,
}
