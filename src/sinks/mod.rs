use tracing::{debug, error, info, warn};

use crate::core::{Alert, EngineStats, RejectNotice, SeverityClass};
use crate::db::SharedAlertStore;

/// The contract consumers of engine output implement (the dashboard, the
/// alert log, history storage).
///
/// Callbacks run synchronously on the pipeline task: implementations must
/// not block for unbounded time; slow consumers buffer internally.
pub trait AlertSink: Send {
    /// One non-benign alert.
    fn on_alert(&mut self, alert: &Alert);

    /// Degraded-mode notice: a record was rejected, not scored.
    fn on_rejected(&mut self, notice: &RejectNotice);

    /// Periodic counter snapshot for dashboard polling.
    fn on_tick(&mut self, stats: &EngineStats);
}

/// Writes alerts and engine health to the log.
pub struct LogSink;

impl AlertSink for LogSink {
    fn on_alert(&mut self, alert: &Alert) {
        let fired = alert.rules.fired_ids().join(",");
        match alert.severity {
            SeverityClass::Malicious => warn!(
                src = %alert.record.src,
                dst = %alert.record.dst,
                rules = %fired,
                score = alert.anomaly.score,
                rationale = %alert.rationale,
                "MALICIOUS traffic detected"
            ),
            SeverityClass::Suspicious => info!(
                src = %alert.record.src,
                dst = %alert.record.dst,
                rules = %fired,
                score = alert.anomaly.score,
                rationale = %alert.rationale,
                "suspicious traffic"
            ),
            SeverityClass::Benign => {}
        }
    }

    fn on_rejected(&mut self, notice: &RejectNotice) {
        warn!(
            src = %notice.src,
            dst = %notice.dst,
            reason = %notice.reason,
            "record rejected (degraded mode)"
        );
    }

    fn on_tick(&mut self, stats: &EngineStats) {
        info!(
            processed = stats.processed,
            benign = stats.benign,
            alerted = stats.alerted,
            rejected = stats.rejected,
            threshold = stats.threshold,
            "engine stats"
        );
    }
}

/// Persists alerts into the history database. Storage failures are logged,
/// never propagated into the detection hot path.
pub struct SqliteSink {
    store: SharedAlertStore,
}

impl SqliteSink {
    pub fn new(store: SharedAlertStore) -> Self {
        Self { store }
    }
}

impl AlertSink for SqliteSink {
    fn on_alert(&mut self, alert: &Alert) {
        if let Err(e) = self.store.store_alert(alert) {
            error!("failed to persist alert: {e}");
        }
    }

    fn on_rejected(&mut self, notice: &RejectNotice) {
        debug!(reason = %notice.reason, "rejected record not persisted");
    }

    fn on_tick(&mut self, _stats: &EngineStats) {}
}
