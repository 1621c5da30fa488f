pub mod expr;

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::core::{FeatureRecord, FeatureSchema, FiredRule, RuleVerdict};
use crate::error::Error;
use expr::{Predicate, PredicateSpec};

/// Severity weights live on a fixed 1–10 scale; aggregate severity is capped
/// at the scale maximum.
pub const SEVERITY_MAX: u8 = 10;

/// A rule as described in the YAML rule file, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub severity: u8,
    pub when: PredicateSpec,
}

/// A compiled, immutable signature rule.
#[derive(Debug, Clone)]
struct Rule {
    id: String,
    #[allow(dead_code)]
    description: String,
    severity: u8,
    predicate: Predicate,
}

/// How severities of co-firing rules combine into one aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityAggregation {
    Sum,
    Max,
}

/// Evaluates an ordered sequence of signature rules against records.
///
/// Evaluation is pure and never short-circuits across rules: co-firing
/// signatures all contribute to the verdict. Sequence order is the tie-break
/// priority consumers see in `RuleVerdict::fired`.
#[derive(Debug)]
pub struct RuleEngine {
    schema: Arc<FeatureSchema>,
    rules: Vec<Rule>,
    aggregation: SeverityAggregation,
}

impl RuleEngine {
    /// Load and compile rules from a YAML file. Any malformed rule fails the
    /// whole load with a configuration error naming the rule.
    pub fn from_yaml_file(
        path: impl AsRef<Path>,
        schema: Arc<FeatureSchema>,
        aggregation: SeverityAggregation,
    ) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read rule file {}: {e}", path.display())))?;
        let specs: Vec<RuleSpec> = serde_yaml::from_str(&contents)
            .map_err(|e| Error::config(format!("malformed rule file {}: {e}", path.display())))?;
        Self::from_specs(specs, schema, aggregation)
    }

    pub fn from_specs(
        specs: Vec<RuleSpec>,
        schema: Arc<FeatureSchema>,
        aggregation: SeverityAggregation,
    ) -> Result<Self, Error> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(specs.len());

        for spec in specs {
            if spec.id.is_empty() {
                return Err(Error::config("rule with empty id"));
            }
            if !seen.insert(spec.id.clone()) {
                return Err(Error::config(format!("duplicate rule id {:?}", spec.id)));
            }
            if spec.severity < 1 || spec.severity > SEVERITY_MAX {
                return Err(Error::config(format!(
                    "rule {:?}: severity {} outside 1..={SEVERITY_MAX}",
                    spec.id, spec.severity
                )));
            }
            let predicate = Predicate::compile(&spec.when, &schema)
                .map_err(|e| Error::config(format!("rule {:?}: {e}", spec.id)))?;
            rules.push(Rule {
                id: spec.id,
                description: spec.description,
                severity: spec.severity,
                predicate,
            });
        }

        Ok(Self { schema, rules, aggregation })
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every rule against one record.
    ///
    /// A record whose vector length disagrees with the schema is rejected
    /// with a schema-mismatch error before any rule runs.
    pub fn evaluate(&self, record: &FeatureRecord) -> Result<RuleVerdict, Error> {
        if record.values.len() != self.schema.len() {
            return Err(Error::schema(format!(
                "record has {} features, rules expect {}",
                record.values.len(),
                self.schema.len()
            )));
        }

        let fired: Vec<FiredRule> = self
            .rules
            .iter()
            .filter(|rule| rule.predicate.eval(record))
            .map(|rule| FiredRule { id: rule.id.clone(), severity: rule.severity })
            .collect();

        let severity = match self.aggregation {
            SeverityAggregation::Sum => fired
                .iter()
                .map(|r| r.severity as u32)
                .sum::<u32>()
                .min(SEVERITY_MAX as u32) as u8,
            SeverityAggregation::Max => fired.iter().map(|r| r.severity).max().unwrap_or(0),
        };

        Ok(RuleVerdict { fired, severity })
    }
}
