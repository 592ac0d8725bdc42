//! maskwatchd - mask-compliance monitoring daemon
//!
//! This daemon:
//! 1. Loads pipeline configuration (file, env overrides, CLI flags)
//! 2. Starts one capture loop per configured stream
//! 3. Runs batched detection over the shared frame bus
//! 4. Publishes throttled alerts (log, optionally MQTT)
//! 5. Persists detections and alerts (SQLite, optionally in-memory)
//! 6. Emits a periodic stats snapshot until Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use maskwatch::{
    InMemoryRecordStore, LogMetricsSink, LogNotifier, MetricsSink, MqttNotifier, Notifier,
    Pipeline, PipelineConfig, RecordStore, SqliteRecordStore, StubDetector,
};

#[derive(Parser, Debug)]
#[command(
    name = "maskwatchd",
    about = "Multi-camera mask-compliance monitoring daemon",
    version
)]
struct Args {
    /// Pipeline config file (JSON)
    #[arg(long, env = "MASKWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path; omit to keep records in memory
    #[arg(long, env = "MASKWATCH_DB_PATH")]
    db_path: Option<PathBuf>,

    /// MQTT broker host; omit to log alerts instead of publishing
    #[arg(long, env = "MASKWATCH_MQTT_HOST")]
    mqtt_host: Option<String>,

    #[arg(long, env = "MASKWATCH_MQTT_PORT", default_value_t = 1883)]
    mqtt_port: u16,

    #[arg(long, env = "MASKWATCH_MQTT_CLIENT_ID", default_value = "maskwatchd")]
    mqtt_client_id: String,

    /// Seconds between stats snapshots
    #[arg(long, env = "MASKWATCH_STATS_INTERVAL", default_value_t = 30)]
    stats_interval: u64,

    /// Label every n-th analyzed frame a violation (stub detector); 0 = never
    #[arg(long, default_value_t = 0)]
    stub_violation_every: u64,

    /// Bound on how long shutdown waits for each capture thread
    #[arg(long, default_value_t = 5)]
    shutdown_timeout_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load_from_path(path)?,
        None => PipelineConfig::load()?,
    };
    if config.streams.is_empty() {
        log::warn!("no streams configured; set MASKWATCH_SOURCES or a config file");
    }

    let store: Arc<dyn RecordStore> = match &args.db_path {
        Some(path) => {
            log::info!("persisting records to {}", path.display());
            Arc::new(SqliteRecordStore::open(path)?)
        }
        None => {
            log::info!("no db path given, keeping records in memory");
            Arc::new(InMemoryRecordStore::new())
        }
    };

    // MQTT doubles as the metrics sink when configured.
    let mut mqtt_sink: Option<Arc<MqttNotifier>> = None;
    let notifier: Arc<dyn Notifier> = match &args.mqtt_host {
        Some(host) => {
            let mqtt = Arc::new(MqttNotifier::connect(
                host,
                args.mqtt_port,
                &args.mqtt_client_id,
            )?);
            mqtt_sink = Some(Arc::clone(&mqtt));
            mqtt
        }
        None => Arc::new(LogNotifier),
    };

    let detector = Arc::new(StubDetector::new(args.stub_violation_every));

    let mut pipeline = Pipeline::new(config, detector, notifier, Arc::clone(&store))?;
    pipeline.start()?;
    log::info!("maskwatchd running");

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let stats_interval = Duration::from_secs(args.stats_interval.max(1));
    let log_sink = LogMetricsSink;
    loop {
        match rx.recv_timeout(stats_interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let snapshot = pipeline.snapshot();
                log_sink.record(&snapshot);
                if let Some(mqtt) = &mqtt_sink {
                    mqtt.record(&snapshot);
                }
                if let Err(e) = store.persist_metrics(&snapshot) {
                    log::warn!("failed to persist metrics snapshot: {}", e);
                }
            }
        }
    }

    log::info!("shutdown signal received, draining pipeline...");
    pipeline.shutdown(Duration::from_secs(args.shutdown_timeout_secs.max(1)));
    let final_snapshot = pipeline.snapshot();
    log_sink.record(&final_snapshot);
    // The pipeline holds the notifier handle; release it so the MQTT
    // connection can be torn down cleanly.
    drop(pipeline);
    if let Some(mqtt) = mqtt_sink {
        if let Ok(mqtt) = Arc::try_unwrap(mqtt) {
            let _ = mqtt.disconnect();
        }
    }
    Ok(())
}
