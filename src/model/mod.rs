pub mod forest;

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use crate::core::{AnomalyVerdict, FeatureRecord, FeatureSchema};
use crate::error::Error;
use forest::IsolationForest;

/// Standard-scaler parameters persisted at training time. Columns with zero
/// variance are persisted with scale 1.0 by the training pipeline; a zero or
/// non-finite scale here is a broken artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct ScalerParams {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

/// The fitted model artifact as persisted by the offline training pipeline:
/// feature order, normalization parameters, the forest structure, and the
/// threshold derived from the training-time contamination rate. The engine
/// loads this file once at construction and never writes it.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelArtifact {
    pub feature_columns: Vec<String>,
    pub scaler: ScalerParams,
    pub contamination: f64,
    pub threshold: f64,
    pub forest: IsolationForest,
}

/// Wraps the fitted outlier model for inference.
///
/// Read-only after construction: the scorer never retrains or adapts itself
/// from live traffic. The outlier threshold is supplied per call so the
/// engine stays the only component that can change detection sensitivity.
#[derive(Debug)]
pub struct AnomalyScorer {
    schema: Arc<FeatureSchema>,
    scaler: ScalerParams,
    contamination: f64,
    default_threshold: f64,
    forest: IsolationForest,
}

impl AnomalyScorer {
    pub fn from_artifact_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(Error::ModelIo)?;
        let artifact: ModelArtifact = serde_json::from_str(&contents).map_err(|e| {
            Error::config(format!("malformed model artifact {}: {e}", path.display()))
        })?;
        Self::from_artifact(artifact)
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, Error> {
        let dim = artifact.feature_columns.len();
        if dim == 0 {
            return Err(Error::config("model artifact has no feature columns"));
        }
        {
            let mut seen = std::collections::HashSet::new();
            for col in &artifact.feature_columns {
                if !seen.insert(col.as_str()) {
                    return Err(Error::config(format!("duplicate feature column {col:?}")));
                }
            }
        }
        if artifact.scaler.mean.len() != dim || artifact.scaler.scale.len() != dim {
            return Err(Error::config(format!(
                "scaler parameters cover {} columns, artifact declares {dim}",
                artifact.scaler.mean.len().min(artifact.scaler.scale.len())
            )));
        }
        if artifact.scaler.scale.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(Error::config("scaler scale values must be finite and non-zero"));
        }
        if artifact.scaler.mean.iter().any(|m| !m.is_finite()) {
            return Err(Error::config("scaler mean values must be finite"));
        }
        if !(0.0..=0.5).contains(&artifact.contamination) || artifact.contamination == 0.0 {
            return Err(Error::config(format!(
                "contamination {} outside (0, 0.5]",
                artifact.contamination
            )));
        }
        if !(0.0..1.0).contains(&artifact.threshold) || artifact.threshold == 0.0 {
            return Err(Error::config(format!(
                "threshold {} outside (0, 1)",
                artifact.threshold
            )));
        }
        artifact
            .forest
            .validate(dim)
            .map_err(|e| Error::config(format!("invalid forest: {e}")))?;

        Ok(Self {
            schema: Arc::new(FeatureSchema::new(artifact.feature_columns)),
            scaler: artifact.scaler,
            contamination: artifact.contamination,
            default_threshold: artifact.threshold,
            forest: artifact.forest,
        })
    }

    /// The feature schema this model was fitted on. Shared with the rule
    /// engine so both detectors agree on field order.
    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    /// Training-time contamination rate; the engine derives its adaptive
    /// quantile from this.
    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    /// Threshold persisted with the artifact, derived at training time from
    /// the contamination rate.
    pub fn default_threshold(&self) -> f64 {
        self.default_threshold
    }

    /// Score one record against the caller-supplied threshold.
    pub fn score(&self, record: &FeatureRecord, threshold: f64) -> Result<AnomalyVerdict, Error> {
        if record.values.len() != self.schema.len() {
            return Err(Error::schema(format!(
                "record has {} features, model was fitted on {}",
                record.values.len(),
                self.schema.len()
            )));
        }

        let scaled: Vec<f64> = record
            .values
            .iter()
            .zip(self.scaler.mean.iter().zip(self.scaler.scale.iter()))
            .map(|(v, (mean, scale))| (v - mean) / scale)
            .collect();

        let score = self.forest.score(&scaled);
        Ok(AnomalyVerdict { score, is_outlier: score >= threshold, threshold })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::{FlowFlag, Protocol};
    use crate::model::forest::{IsolationTree, TreeNode};
    use chrono::Utc;

    /// Two-feature fixture model. Each tree splits once at 2.0 (scaled), so
    /// records far from the training mean on either feature land in the
    /// shallow outlier leaf.
    pub(crate) fn fixture_artifact() -> ModelArtifact {
        let tree = |feature| IsolationTree {
            nodes: vec![
                TreeNode::Split { feature, split: 2.0, left: 1, right: 2 },
                TreeNode::Leaf { size: 255 },
                TreeNode::Leaf { size: 1 },
            ],
        };
        ModelArtifact {
            feature_columns: vec!["pkts_per_sec".into(), "bytes_per_sec".into()],
            scaler: ScalerParams { mean: vec![10.0, 1000.0], scale: vec![5.0, 500.0] },
            contamination: 0.05,
            threshold: 0.7,
            forest: IsolationForest { trees: vec![tree(0), tree(1)], subsample_size: 256 },
        }
    }

    pub(crate) fn record(values: Vec<f64>) -> FeatureRecord {
        FeatureRecord {
            values,
            protocol: Protocol::Tcp,
            flags: vec![FlowFlag::Ack],
            src: "10.0.0.1".into(),
            dst: "10.0.0.2".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn scores_normal_record_below_outlier() {
        let scorer = AnomalyScorer::from_artifact(fixture_artifact()).unwrap();
        // at the training mean: scaled to (0, 0), deep side of both splits
        let normal = scorer.score(&record(vec![10.0, 1000.0]), 0.6).unwrap();
        // far above the mean on both features: shallow side of both splits
        let hot = scorer.score(&record(vec![100.0, 100_000.0]), 0.6).unwrap();
        assert!(hot.score > normal.score);
        assert!(hot.is_outlier);
        assert!(!normal.is_outlier);
    }

    #[test]
    fn verdict_carries_threshold_used() {
        let scorer = AnomalyScorer::from_artifact(fixture_artifact()).unwrap();
        let verdict = scorer.score(&record(vec![10.0, 1000.0]), 0.42).unwrap();
        assert_eq!(verdict.threshold, 0.42);
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let scorer = AnomalyScorer::from_artifact(fixture_artifact()).unwrap();
        let err = scorer.score(&record(vec![1.0, 2.0, 3.0]), 0.6).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
        let err = scorer.score(&record(vec![1.0]), 0.6).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
    }

    #[test]
    fn scaler_length_mismatch_fails_load() {
        let mut artifact = fixture_artifact();
        artifact.scaler.mean.pop();
        assert!(matches!(
            AnomalyScorer::from_artifact(artifact),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn zero_scale_fails_load() {
        let mut artifact = fixture_artifact();
        artifact.scaler.scale[0] = 0.0;
        assert!(matches!(
            AnomalyScorer::from_artifact(artifact),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn contamination_out_of_range_fails_load() {
        let mut artifact = fixture_artifact();
        artifact.contamination = 0.9;
        assert!(matches!(
            AnomalyScorer::from_artifact(artifact),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn missing_artifact_file_is_model_io() {
        let err = AnomalyScorer::from_artifact_file("does/not/exist.json").unwrap_err();
        assert!(matches!(err, Error::ModelIo(_)));
    }

    #[test]
    fn artifact_json_round_trip() {
        let json = r#"{
            "feature_columns": ["a", "b"],
            "scaler": {"mean": [0.0, 0.0], "scale": [1.0, 1.0]},
            "contamination": 0.1,
            "threshold": 0.55,
            "forest": {
                "subsample_size": 64,
                "trees": [{"nodes": [
                    {"feature": 0, "split": 1.5, "left": 1, "right": 2},
                    {"size": 60},
                    {"size": 4}
                ]}]
            }
        }"#;
        let artifact: ModelArtifact = serde_json::from_str(json).unwrap();
        let scorer = AnomalyScorer::from_artifact(artifact).unwrap();
        assert_eq!(scorer.schema().columns(), ["a", "b"]);
        assert_eq!(scorer.default_threshold(), 0.55);
    }
}
