use tokio::sync::mpsc;
use tracing::{error, info};

use crate::core::engine::DetectionEngine;
use crate::core::{EngineStats, FeatureRecord, RejectNotice};
use crate::error::Error;
use crate::sinks::AlertSink;

/// Run the pipeline: receive FeatureRecords, score, fuse, forward to sinks.
///
/// One engine instance per pipeline; the channel serializes the record
/// stream so `process` is never invoked concurrently. Backpressure is the
/// source's problem; the engine pulls nothing and queues nothing itself.
pub async fn run_pipeline(
    mut rx: mpsc::UnboundedReceiver<FeatureRecord>,
    mut engine: DetectionEngine,
    mut sinks: Vec<Box<dyn AlertSink>>,
    stats_interval: usize,
) -> Result<EngineStats, Error> {
    engine.start()?;
    let mut seen: u64 = 0;

    info!("Pipeline started, waiting for traffic records...");

    while let Some(record) = rx.recv().await {
        match engine.process(&record) {
            Ok(Some(alert)) => {
                for sink in &mut sinks {
                    sink.on_alert(&alert);
                }
            }
            Ok(None) => {}
            Err(Error::SchemaMismatch(reason)) => {
                let notice = RejectNotice {
                    src: record.src.clone(),
                    dst: record.dst.clone(),
                    reason,
                    timestamp: record.timestamp,
                };
                for sink in &mut sinks {
                    sink.on_rejected(&notice);
                }
            }
            Err(e) => {
                // Lifecycle errors here mean the driver is broken, not the traffic.
                error!("pipeline stopping on engine error: {e}");
                break;
            }
        }

        seen += 1;
        if stats_interval > 0 && seen % stats_interval as u64 == 0 {
            let stats = engine.stats();
            for sink in &mut sinks {
                sink.on_tick(&stats);
            }
        }
        if seen % 1000 == 0 {
            let stats = engine.stats();
            info!(
                "Pipeline processed {} records ({} alerted, {} rejected)",
                stats.processed, stats.alerted, stats.rejected
            );
        }
    }

    engine.stop();
    let stats = engine.stats();
    for sink in &mut sinks {
        sink.on_tick(&stats);
    }
    info!(
        "Pipeline shutting down after {} records ({} alerted, {} rejected)",
        stats.processed, stats.alerted, stats.rejected
    );
    Ok(stats)
}
