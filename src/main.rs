mod config;
mod core;
mod db;
mod error;
mod fusion;
mod model;
mod rules;
mod sinks;
mod source;

use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::core::engine::DetectionEngine;
use crate::db::SharedAlertStore;
use crate::model::AnomalyScorer;
use crate::rules::RuleEngine;
use crate::sinks::{AlertSink, LogSink, SqliteSink};
use crate::source::start_replay_feeder;

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("flowsentry=info".parse().unwrap()),
        )
        .init();

    tracing::info!("FlowSentry starting...");

    // Load configuration
    let config = Config::load("config.toml");
    tracing::info!("Config: {:?}", config);

    // Load the fitted model artifact; its feature schema is the contract
    // both detectors share.
    let scorer = Arc::new(
        AnomalyScorer::from_artifact_file(&config.model.path)
            .expect("Failed to load model artifact"),
    );
    tracing::info!(
        "Model artifact loaded: {} features, default threshold {:.4}",
        scorer.schema().len(),
        scorer.default_threshold()
    );

    // Compile the signature rule set against the model schema
    let rule_engine = Arc::new(
        RuleEngine::from_yaml_file(
            &config.rules.path,
            scorer.schema().clone(),
            config.engine.rule_aggregation,
        )
        .expect("Failed to load rule set"),
    );
    tracing::info!("Loaded {} detection rules", rule_engine.len());

    // Build the detection engine
    let engine = DetectionEngine::new(rule_engine, scorer, &config.engine)
        .expect("Failed to build detection engine");

    // Open alert history database
    let db_path = Path::new(&config.database.path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create database directory");
    }
    let store = SharedAlertStore::open(db_path).expect("Failed to open alert database");
    tracing::info!("Alert database opened at {}", config.database.path);

    let sinks: Vec<Box<dyn AlertSink>> = vec![
        Box::new(LogSink),
        Box::new(SqliteSink::new(store.clone())),
    ];

    // Replay feeder -> pipeline channel
    let (record_tx, record_rx) = mpsc::unbounded_channel();
    let _feeder_handle = start_replay_feeder(config.replay.clone(), record_tx);

    // Run the pipeline on a tokio runtime until the capture is exhausted
    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
    let stats = rt
        .block_on(core::pipeline::run_pipeline(
            record_rx,
            engine,
            sinks,
            config.sinks.stats_interval_records,
        ))
        .expect("Pipeline failed");

    tracing::info!(
        "Done: {} processed, {} benign, {} alerted, {} rejected (final threshold {:.4})",
        stats.processed,
        stats.benign,
        stats.alerted,
        stats.rejected,
        stats.threshold
    );
    match store.severity_counts() {
        Ok(counts) => {
            for (severity, count) in counts {
                tracing::info!("  stored {severity} alerts: {count}");
            }
        }
        Err(e) => tracing::warn!("Failed to read back alert counts: {e}"),
    }
}
