//! QDET Detector (qdet-dt)
//!
//! Scans continuous multi-station waveform streams for repeats of
//! catalogued reference events by matched filtering, and publishes
//! consolidated multi-channel detections.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qdet_dt::amplitude::RmsAmplitude;
use qdet_dt::config::{load_detector_configs, AppConfig};
use qdet_dt::detector::Detector;
use qdet_dt::engine::Engine;
use qdet_dt::publish::DetectionPublisher;
use qdet_dt::replay::JsonLinesRecordSource;
use qdet_dt::sink::{JsonLinesSink, ResultSink};
use qdet_dt::waveform::{CachingWaveformProvider, DirectoryWaveformProvider, WaveformProvider};

/// QDET Detector - matched-filter seismic event detection
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Application configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Record replay file (overrides the configuration)
    #[arg(short, long, value_name = "FILE")]
    records: Option<PathBuf>,

    /// Detection output file (overrides the configuration)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("qdet_dt={log_level},qdet_common={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("QDET Detector starting...");

    info!("Loading configuration from {}...", args.config.display());
    let mut app_config = AppConfig::load(&args.config)?;
    if let Some(records) = args.records {
        app_config.records = records;
    }
    if let Some(output) = args.output {
        app_config.output = Some(output);
    }

    info!("Loading detector catalog from {}...", app_config.templates.display());
    let detector_configs = load_detector_configs(&app_config.templates)?;
    info!("{} detector(s) configured", detector_configs.len());

    if let Some(debug_dir) = &app_config.debug_dir {
        std::fs::create_dir_all(debug_dir)?;
    }

    let provider: Arc<dyn WaveformProvider> = Arc::new(CachingWaveformProvider::new(
        DirectoryWaveformProvider::new(&app_config.waveform_dir),
    ));

    // Build all detectors; any template preparation failure is fatal
    let mut detectors = Vec::new();
    for config in &detector_configs {
        let mut builder = Detector::builder(config.detector_id.clone(), config.origin.clone())
            .gap_tolerance(config.gap_tolerance)
            .gap_interpolation(config.gap_interpolation)
            .on_hold(config.on_hold)
            .arrival_offset_threshold(config.arrival_offset())
            .result_threshold(config.result_threshold)
            .min_arrivals(config.min_arrivals)
            .with_arrivals(config.with_arrivals)
            .debug_dir(app_config.debug_dir.clone());

        for stream in &config.streams {
            builder = builder.stream(stream, provider.as_ref())?;
        }

        detectors.push(builder.build()?);
    }

    let sink: Box<dyn ResultSink> = match &app_config.output {
        Some(path) => Box::new(JsonLinesSink::to_file(path)?),
        None => Box::new(JsonLinesSink::to_stdout()),
    };

    let mut publisher = DetectionPublisher::new(sink);
    if let Some(amplitudes) = &app_config.amplitudes {
        publisher = publisher.with_amplitudes(Box::new(RmsAmplitude::new(
            provider.clone(),
            amplitudes.unit,
            amplitudes.window_seconds,
        )));
    }

    let mut engine = Engine::new(detectors, publisher);

    info!("Replaying records from {}...", app_config.records.display());
    let source = JsonLinesRecordSource::open(&app_config.records)?;

    let run = tokio::task::spawn_blocking(move || engine.run(source));

    tokio::select! {
        result = run => {
            let summary = result??;
            info!(
                "Done: {} records processed, {} detections published",
                summary.records, summary.detections
            );
        }
        _ = tokio::signal::ctrl_c() => {
            error!("Interrupted, shutting down without flushing");
        }
    }

    Ok(())
}
