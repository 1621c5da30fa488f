use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::core::{Alert, EngineStats, FeatureRecord, SeverityClass};
use crate::error::Error;
use crate::fusion::FusionPolicy;
use crate::model::AnomalyScorer;
use crate::rules::{RuleEngine, SEVERITY_MAX};

/// Lifecycle of one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Initialized,
    Running,
    Stopped,
}

impl EnginePhase {
    fn name(&self) -> &'static str {
        match self {
            EnginePhase::Initialized => "initialized",
            EnginePhase::Running => "running",
            EnginePhase::Stopped => "stopped",
        }
    }
}

/// Adaptive-threshold bookkeeping: scores observed since the last update.
struct AdaptiveState {
    window_size: usize,
    quantile: f64,
    scores: Vec<f64>,
}

/// Orchestrates both detectors over a single logical stream of records.
///
/// All mutable state (threshold, counters, recent-alert buffer) is owned by
/// the instance; rules and scorer are shared read-only, so many engines can
/// run side by side over one fitted model. `process` is not reentrant:
/// callers needing concurrency put one engine per worker or serialize calls.
pub struct DetectionEngine {
    rules: Arc<RuleEngine>,
    scorer: Arc<AnomalyScorer>,
    fusion: FusionPolicy,
    phase: EnginePhase,
    threshold: f64,
    adaptive: Option<AdaptiveState>,
    recent: VecDeque<Alert>,
    buffer_cap: usize,
    stats: EngineStats,
}

impl DetectionEngine {
    /// Build an engine in the `Initialized` phase. Fails with a
    /// configuration error when the two detectors disagree on the feature
    /// schema or the engine settings are out of range.
    pub fn new(
        rules: Arc<RuleEngine>,
        scorer: Arc<AnomalyScorer>,
        config: &EngineConfig,
    ) -> Result<Self, Error> {
        if rules.schema() != scorer.schema() {
            return Err(Error::config(
                "rule engine and anomaly scorer were built against different feature schemas",
            ));
        }
        if config.critical_severity_cutoff < 1 || config.critical_severity_cutoff > SEVERITY_MAX {
            return Err(Error::config(format!(
                "critical_severity_cutoff {} outside 1..={SEVERITY_MAX}",
                config.critical_severity_cutoff
            )));
        }
        if config.recent_alert_buffer_size == 0 {
            return Err(Error::config("recent_alert_buffer_size must be at least 1"));
        }

        let threshold = match config.initial_threshold {
            Some(t) => {
                if !(t > 0.0 && t < 1.0) {
                    return Err(Error::config(format!("initial_threshold {t} outside (0, 1)")));
                }
                t
            }
            None => scorer.default_threshold(),
        };

        let adaptive = if config.adaptive.enabled {
            if config.adaptive.window_size == 0 {
                return Err(Error::config("adaptive window_size must be at least 1"));
            }
            Some(AdaptiveState {
                window_size: config.adaptive.window_size,
                quantile: 1.0 - scorer.contamination(),
                scores: Vec::with_capacity(config.adaptive.window_size),
            })
        } else {
            None
        };

        Ok(Self {
            rules,
            scorer,
            fusion: FusionPolicy::new(config.critical_severity_cutoff),
            phase: EnginePhase::Initialized,
            threshold,
            adaptive,
            recent: VecDeque::with_capacity(config.recent_alert_buffer_size),
            buffer_cap: config.recent_alert_buffer_size,
            stats: EngineStats::default(),
        })
    }

    /// Transition `Initialized` -> `Running`. Idempotent while running;
    /// a stopped engine cannot be restarted.
    pub fn start(&mut self) -> Result<(), Error> {
        match self.phase {
            EnginePhase::Initialized => {
                self.phase = EnginePhase::Running;
                info!(threshold = self.threshold, "detection engine running");
                Ok(())
            }
            EnginePhase::Running => Ok(()),
            EnginePhase::Stopped => Err(Error::Lifecycle { phase: self.phase.name() }),
        }
    }

    /// Stop accepting records. Counters and the recent-alert buffer remain
    /// readable.
    pub fn stop(&mut self) {
        if self.phase != EnginePhase::Stopped {
            self.phase = EnginePhase::Stopped;
            info!(
                processed = self.stats.processed,
                alerted = self.stats.alerted,
                rejected = self.stats.rejected,
                "detection engine stopped"
            );
        }
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// Anomaly threshold currently in effect.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Snapshot of the engine counters.
    pub fn stats(&self) -> EngineStats {
        let mut stats = self.stats.clone();
        stats.threshold = self.threshold;
        stats
    }

    /// Recent non-benign alerts, oldest first, bounded by configuration.
    pub fn recent_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.recent.iter()
    }

    /// Run one record through both detectors and the fusion policy.
    ///
    /// Returns `None` for benign records. A record whose shape disagrees
    /// with the schema is rejected: only the `rejected` counter moves and
    /// the error carries the diagnostic.
    pub fn process(&mut self, record: &FeatureRecord) -> Result<Option<Alert>, Error> {
        if self.phase != EnginePhase::Running {
            return Err(Error::Lifecycle { phase: self.phase.name() });
        }

        let rule_verdict = match self.rules.evaluate(record) {
            Ok(v) => v,
            Err(e) => return self.reject(e),
        };
        let anomaly_verdict = match self.scorer.score(record, self.threshold) {
            Ok(v) => v,
            Err(e) => return self.reject(e),
        };

        self.observe_score(anomaly_verdict.score);
        self.stats.processed += 1;

        let alert = self.fusion.fuse(record, rule_verdict, anomaly_verdict);
        if alert.severity == SeverityClass::Benign {
            self.stats.benign += 1;
            return Ok(None);
        }

        self.stats.alerted += 1;
        if self.recent.len() == self.buffer_cap {
            self.recent.pop_front();
        }
        self.recent.push_back(alert.clone());
        Ok(Some(alert))
    }

    fn reject(&mut self, err: Error) -> Result<Option<Alert>, Error> {
        self.stats.rejected += 1;
        debug!(error = %err, "record rejected");
        Err(err)
    }

    /// Feed the adaptive window; after exactly `window_size` scored records
    /// the threshold becomes the configured empirical quantile of the window
    /// and the window resets. This is the only place thresholds change.
    fn observe_score(&mut self, score: f64) {
        let Some(adaptive) = self.adaptive.as_mut() else {
            return;
        };
        adaptive.scores.push(score);
        if adaptive.scores.len() < adaptive.window_size {
            return;
        }

        let mut scores = std::mem::take(&mut adaptive.scores);
        scores.sort_by(f64::total_cmp);
        let rank = ((scores.len() as f64) * adaptive.quantile).floor() as usize;
        let new_threshold = scores[rank.min(scores.len() - 1)];

        info!(
            old = self.threshold,
            new = new_threshold,
            window = adaptive.window_size,
            "adaptive threshold updated"
        );
        self.threshold = new_threshold;
        self.stats.threshold_updates += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdaptiveConfig, EngineConfig};
    use crate::model::tests::{fixture_artifact, record};
    use crate::rules::{RuleSpec, SeverityAggregation};
    use std::sync::Arc;

    const RULES_YAML: &str = "
- id: SYN-flood
  description: packet rate above flood threshold
  severity: 9
  when: {field: pkts_per_sec, op: gt, value: 1000}
- id: slow-drip
  description: sustained low-and-slow byte trickle
  severity: 3
  when: {field: bytes_per_sec, op: lt, value: 10}
";

    fn build_engine(config: &EngineConfig) -> DetectionEngine {
        let scorer = Arc::new(AnomalyScorer::from_artifact(fixture_artifact()).unwrap());
        let specs: Vec<RuleSpec> = serde_yaml::from_str(RULES_YAML).unwrap();
        let rules = Arc::new(
            RuleEngine::from_specs(specs, scorer.schema().clone(), SeverityAggregation::Sum)
                .unwrap(),
        );
        DetectionEngine::new(rules, scorer, config).unwrap()
    }

    fn running_engine(config: &EngineConfig) -> DetectionEngine {
        let mut engine = build_engine(config);
        engine.start().unwrap();
        engine
    }

    fn default_config() -> EngineConfig {
        EngineConfig {
            critical_severity_cutoff: 8,
            recent_alert_buffer_size: 4,
            rule_aggregation: SeverityAggregation::Sum,
            initial_threshold: None,
            adaptive: AdaptiveConfig { enabled: false, window_size: 500 },
        }
    }

    /// At the training mean: no rule fires, anomaly score well below the
    /// fixture threshold.
    fn benign_record() -> crate::core::FeatureRecord {
        record(vec![10.0, 1000.0])
    }

    /// Far off the mean on both features: strong outlier, no rule fires.
    fn outlier_record() -> crate::core::FeatureRecord {
        record(vec![100.0, 100_000.0])
    }

    /// Fires SYN-flood (severity 9) but sits at the training mean on the
    /// bytes feature, so only one tree isolates it: score below threshold.
    fn syn_flood_record() -> crate::core::FeatureRecord {
        record(vec![2000.0, 1000.0])
    }

    #[test]
    fn benign_record_returns_none_and_counts() {
        let mut engine = running_engine(&default_config());
        let out = engine.process(&benign_record()).unwrap();
        assert!(out.is_none());
        let stats = engine.stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.benign, 1);
        assert_eq!(stats.alerted, 0);
        assert_eq!(engine.recent_alerts().count(), 0);
    }

    #[test]
    fn critical_rule_is_malicious_despite_quiet_anomaly() {
        let mut engine = running_engine(&default_config());
        let alert = engine.process(&syn_flood_record()).unwrap().unwrap();
        assert_eq!(alert.severity, SeverityClass::Malicious);
        assert!(alert.rationale.contains("SYN-flood"), "{}", alert.rationale);
        assert!(!alert.anomaly.is_outlier);
    }

    #[test]
    fn statistical_only_outlier_is_suspicious() {
        let mut engine = running_engine(&default_config());
        let alert = engine.process(&outlier_record()).unwrap().unwrap();
        assert_eq!(alert.severity, SeverityClass::Suspicious);
        assert_eq!(alert.rationale, crate::fusion::STATISTICAL_ONLY);
    }

    #[test]
    fn rejected_record_moves_only_rejected_counter() {
        let mut engine = running_engine(&default_config());
        let err = engine.process(&record(vec![1.0, 2.0, 3.0, 4.0, 5.0])).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
        let stats = engine.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.benign, 0);
        assert_eq!(stats.alerted, 0);
    }

    #[test]
    fn stopped_engine_rejects_process_but_keeps_stats() {
        let mut engine = running_engine(&default_config());
        engine.process(&outlier_record()).unwrap();
        engine.stop();
        let err = engine.process(&benign_record()).unwrap_err();
        assert!(matches!(err, Error::Lifecycle { .. }));
        assert_eq!(engine.stats().alerted, 1);
        assert_eq!(engine.phase(), EnginePhase::Stopped);
    }

    #[test]
    fn initialized_engine_rejects_process_until_started() {
        let mut engine = build_engine(&default_config());
        assert!(matches!(
            engine.process(&benign_record()),
            Err(Error::Lifecycle { .. })
        ));
        engine.start().unwrap();
        assert!(engine.process(&benign_record()).is_ok());
    }

    #[test]
    fn stopped_engine_cannot_restart() {
        let mut engine = running_engine(&default_config());
        engine.stop();
        assert!(matches!(engine.start(), Err(Error::Lifecycle { .. })));
    }

    #[test]
    fn recent_buffer_evicts_oldest_first() {
        let mut config = default_config();
        config.recent_alert_buffer_size = 2;
        let mut engine = running_engine(&config);

        for _ in 0..5 {
            engine.process(&outlier_record()).unwrap();
        }
        engine.process(&syn_flood_record()).unwrap();

        let recent: Vec<_> = engine.recent_alerts().collect();
        assert_eq!(recent.len(), 2);
        // newest alert (the SYN-flood) is at the back
        assert_eq!(recent[1].severity, SeverityClass::Malicious);
        assert_eq!(recent[0].severity, SeverityClass::Suspicious);
    }

    #[test]
    fn initial_threshold_override_applies() {
        let mut config = default_config();
        config.initial_threshold = Some(0.95);
        let mut engine = running_engine(&config);
        // the usual outlier no longer crosses the raised threshold
        let out = engine.process(&outlier_record()).unwrap();
        assert!(out.is_none());
        assert_eq!(engine.threshold(), 0.95);
    }

    #[test]
    fn adaptive_threshold_updates_on_window_boundary_only() {
        let mut config = default_config();
        config.adaptive = AdaptiveConfig { enabled: true, window_size: 10 };
        let mut engine = running_engine(&config);

        for _ in 0..9 {
            engine.process(&benign_record()).unwrap();
            assert_eq!(engine.stats().threshold_updates, 0);
        }
        engine.process(&benign_record()).unwrap();
        assert_eq!(engine.stats().threshold_updates, 1);

        for _ in 0..9 {
            engine.process(&benign_record()).unwrap();
        }
        assert_eq!(engine.stats().threshold_updates, 2);
    }

    #[test]
    fn identical_streams_produce_identical_threshold_trajectories() {
        let mut config = default_config();
        config.adaptive = AdaptiveConfig { enabled: true, window_size: 5 };

        let stream: Vec<_> = (0..20)
            .map(|i| record(vec![10.0 + (i as f64) * 7.0, 1000.0 + (i as f64) * 900.0]))
            .collect();

        let mut a = running_engine(&config);
        let mut b = running_engine(&config);
        for rec in &stream {
            let _ = a.process(rec);
            let _ = b.process(rec);
            assert_eq!(a.threshold(), b.threshold());
        }
        assert!(a.stats().threshold_updates > 0);
        assert_eq!(a.stats(), b.stats());
    }

    #[test]
    fn rejected_records_do_not_advance_adaptive_window() {
        let mut config = default_config();
        config.adaptive = AdaptiveConfig { enabled: true, window_size: 3 };
        let mut engine = running_engine(&config);

        engine.process(&benign_record()).unwrap();
        let _ = engine.process(&record(vec![1.0]));
        engine.process(&benign_record()).unwrap();
        assert_eq!(engine.stats().threshold_updates, 0);
        engine.process(&benign_record()).unwrap();
        assert_eq!(engine.stats().threshold_updates, 1);
    }

    #[test]
    fn mismatched_schemas_fail_construction() {
        let scorer = Arc::new(AnomalyScorer::from_artifact(fixture_artifact()).unwrap());
        let other_schema = Arc::new(crate::core::FeatureSchema::new(vec!["x".into()]));
        let rules = Arc::new(
            RuleEngine::from_specs(vec![], other_schema, SeverityAggregation::Sum).unwrap(),
        );
        assert!(matches!(
            DetectionEngine::new(rules, scorer, &default_config()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn zero_buffer_size_fails_construction() {
        let mut config = default_config();
        config.recent_alert_buffer_size = 0;
        let scorer = Arc::new(AnomalyScorer::from_artifact(fixture_artifact()).unwrap());
        let rules = Arc::new(
            RuleEngine::from_specs(vec![], scorer.schema().clone(), SeverityAggregation::Sum)
                .unwrap(),
        );
        assert!(matches!(
            DetectionEngine::new(rules, scorer, &config),
            Err(Error::Config(_))
        ));
    }
}
