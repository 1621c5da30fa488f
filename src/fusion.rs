use crate::core::{Alert, AnomalyVerdict, FeatureRecord, RuleVerdict, SeverityClass};

/// Rationale for a statistical-only detection; fixed text for audit parity.
pub const STATISTICAL_ONLY: &str = "statistical-only, unconfirmed";

/// Rationale for a record neither detector flagged.
pub const NO_SIGNAL: &str = "no rule or anomaly signal";

/// Combines the rule verdict and the anomaly verdict into one alert
/// decision.
///
/// The decision table is ordered, highest priority first:
/// 1. any single rule at or above the critical cutoff  => malicious
/// 2. rule fired and anomaly outlier flag set          => malicious
/// 3. rule fired alone                                 => suspicious
/// 4. anomaly outlier flag set alone                   => suspicious
/// 5. neither                                          => benign
///
/// Rationale strings are generated with fixed formatting so identical
/// verdicts always produce byte-identical alerts (the record timestamp is
/// the only carried-over field that varies).
#[derive(Debug, Clone)]
pub struct FusionPolicy {
    critical_cutoff: u8,
}

impl FusionPolicy {
    pub fn new(critical_cutoff: u8) -> Self {
        Self { critical_cutoff }
    }

    pub fn critical_cutoff(&self) -> u8 {
        self.critical_cutoff
    }

    pub fn fuse(
        &self,
        record: &FeatureRecord,
        rules: RuleVerdict,
        anomaly: AnomalyVerdict,
    ) -> Alert {
        let (severity, rationale) = self.decide(&rules, &anomaly);
        Alert {
            record: record.clone(),
            rules,
            anomaly,
            severity,
            rationale,
        }
    }

    fn decide(&self, rules: &RuleVerdict, anomaly: &AnomalyVerdict) -> (SeverityClass, String) {
        if !rules.none_fired() {
            if let Some(critical) = self.critical_rule(rules) {
                return (
                    SeverityClass::Malicious,
                    format!(
                        "critical rule {} (severity {} >= cutoff {})",
                        critical.0, critical.1, self.critical_cutoff
                    ),
                );
            }
            let ids = rules.fired_ids().join(", ");
            if anomaly.is_outlier {
                return (
                    SeverityClass::Malicious,
                    format!(
                        "rules [{ids}] corroborated by anomaly score {:.4} >= threshold {:.4}",
                        anomaly.score, anomaly.threshold
                    ),
                );
            }
            return (
                SeverityClass::Suspicious,
                format!("rules [{ids}] fired without anomaly corroboration"),
            );
        }
        if anomaly.is_outlier {
            return (SeverityClass::Suspicious, STATISTICAL_ONLY.to_string());
        }
        (SeverityClass::Benign, NO_SIGNAL.to_string())
    }

    /// Highest-severity rule at or above the cutoff; sequence order breaks
    /// ties (strictly-greater keeps the earliest maximum).
    fn critical_rule<'a>(&self, rules: &'a RuleVerdict) -> Option<(&'a str, u8)> {
        let mut best: Option<(&str, u8)> = None;
        for rule in rules.fired.iter().filter(|r| r.severity >= self.critical_cutoff) {
            if best.is_none_or(|(_, s)| rule.severity > s) {
                best = Some((rule.id.as_str(), rule.severity));
            }
        }
        best
    }
}
