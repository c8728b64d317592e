//! # CanSat Ground Station
//!
//! Receive, validate and record CanSat telemetry from the base station radio.
//!
//! This application runs the ingest pipeline on a dedicated worker thread
//! and prints the latest reading once per poll interval until Ctrl+C.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use cansat_ground_station::config::{Config, LoggingConfig};
use cansat_ground_station::events::{EventBus, PipelineEvent};
use cansat_ground_station::frame::TelemetryRecord;
use cansat_ground_station::pipeline::{Pipeline, PipelineStats, StatsSnapshot};
use cansat_ground_station::serial::port_trait::SerialConnector;
use cansat_ground_station::serial::LinkManager;
use cansat_ground_station::telemetry::{DurableLog, RecordExporter, TelemetryStore};

/// Default configuration file path
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Command line arguments
#[derive(Debug, Parser)]
#[command(version, about = "CanSat ground station telemetry receiver")]
struct Args {
    /// Configuration file (defaults are used if it does not exist)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port of the base station, overriding the config file
    #[arg(short, long)]
    port: Option<String>,
}

/// Main entry point for the ground station
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration, apply CLI overrides
///    - Set up console + daily rolling file logging
///    - Create the durable log and the telemetry store
///
/// 2. **Main Loop**
///    - Ingest runs on its own thread, reconnecting as needed
///    - Log the latest record every poll interval
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Stop the worker and close the link
///    - Log totals
///
/// # Examples
///
/// ```bash
/// cargo run --release -- --port /dev/ttyUSB0
/// ```
///
/// Expected output:
/// ```text
/// INFO cansat_ground_station: CanSat ground station v0.1.0 starting...
/// INFO cansat_ground_station: Recording raw frames to ./data/data_20240501_120000.csv
/// INFO cansat_ground_station::serial: Connected to /dev/ttyUSB0
/// INFO cansat_ground_station: #1 lat=57.00000 lon=25.00000 alt=100.0m temp=21.5C press=101300Pa rssi=-60 snr=9 fix=yes
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_found = args.config.exists();
    let mut config = if config_found {
        Config::load(&args.config).with_context(|| format!("loading {}", args.config.display()))?
    } else {
        Config::default()
    };

    if let Some(port) = args.port {
        config.link.port = port;
        config.validate()?;
    }

    let _log_guard = init_logging(&config.logging);

    info!("CanSat ground station v{} starting...", env!("CARGO_PKG_VERSION"));
    if !config_found {
        warn!("{} not found, using default configuration", args.config.display());
    }

    let events = EventBus::default();
    tokio::spawn(log_events(events.subscribe()));

    let durable_log = DurableLog::from_config(&config.durable_log).context("creating durable log")?;
    info!("Recording raw frames to {}", durable_log.path().display());

    let (writer, store) = TelemetryStore::new();
    let link = LinkManager::from_config(
        SerialConnector::new(config.link.baud_rate),
        &config.link,
        events.clone(),
    );

    let mut pipeline = Pipeline::new(link, Box::new(durable_log), writer, events);
    if config.export.enabled {
        let exporter = RecordExporter::from_config(&config.export).context("creating record export")?;
        pipeline = pipeline.with_exporter(exporter);
    }

    let handle = pipeline.spawn().context("starting ingest worker")?;
    info!(
        "Listening on {} at {} baud, press Ctrl+C to exit",
        config.link.port, config.link.baud_rate
    );

    let poll_interval = Duration::from_millis(config.consumer.poll_interval_ms);
    report_until(&store, handle.stats(), poll_interval, tokio::signal::ctrl_c()).await;
    info!("Received Ctrl+C, shutting down...");

    let stats = tokio::task::spawn_blocking(move || handle.join())
        .await?
        .map_err(|_| anyhow!("ingest worker panicked"))?;

    info!("{}", totals(&stats));
    Ok(())
}

/// Log the latest record once per `period` until `stop` resolves
///
/// `stop` is polled across every tick, so a signal arriving between ticks
/// is not lost. Returns the number of records seen.
async fn report_until<F: Future>(store: &TelemetryStore, stats: &PipelineStats, period: Duration, stop: F) -> usize {
    let mut poll = interval(period);
    let mut seen = 0;
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                let len = store.len();
                if len > seen {
                    if let Some(record) = store.latest() {
                        info!("#{} {}", len, summarize(&record));
                    }
                    seen = len;
                } else {
                    debug!("No new records ({:?})", stats.state());
                }
            }

            _ = &mut stop => break,
        }
    }

    seen
}

/// Console and daily rolling file logging
///
/// The returned guard must be held until exit so buffered file output is flushed.
fn init_logging(config: &LoggingConfig) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(&config.dir, &config.file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    guard
}

/// Forward lifecycle events to the diagnostic log
async fn log_events(mut rx: broadcast::Receiver<PipelineEvent>) {
    loop {
        match rx.recv().await {
            Ok(PipelineEvent::Connecting { address, attempt }) => {
                debug!("Connecting to {} (attempt {})", address, attempt)
            }
            Ok(PipelineEvent::Connected { address }) => info!("Link up: {}", address),
            Ok(PipelineEvent::Disconnected { address, reason }) => {
                warn!("Link down: {} ({})", address, reason)
            }
            Ok(PipelineEvent::ParseFailure { line, error }) => debug!("Parse failure: {} in {:?}", error, line),
            Ok(PipelineEvent::PersistenceFailure { error }) => debug!("Persistence failure: {}", error),
            Err(RecvError::Lagged(missed)) => warn!("Event log fell behind, {} events dropped", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

/// One-line summary of a record for the console
fn summarize(record: &TelemetryRecord) -> String {
    format!(
        "lat={:.5} lon={:.5} alt={:.1}m temp={:.1}C press={:.0}Pa rssi={} snr={} fix={}",
        record.latitude,
        record.longitude,
        record.altitude,
        record.temperature,
        record.pressure,
        record.rssi,
        record.snr,
        if record.has_position_fix() { "yes" } else { "no" },
    )
}

fn totals(stats: &StatsSnapshot) -> String {
    format!(
        "Frames received: {}, stored: {}, corrupted: {}, unparseable: {}, persistence failures: {}, link failures: {}, reconnect attempts: {}",
        stats.frames_received,
        stats.records_stored,
        stats.frames_corrupted,
        stats.parse_failures,
        stats.persistence_failures,
        stats.link_failures,
        stats.reconnect_attempts,
    )
}
