use serde::Deserialize;
use std::path::Path;

use crate::rules::SeverityAggregation;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub rules: RulesConfig,
    pub model: ModelConfig,
    pub replay: ReplayConfig,
    pub database: DatabaseConfig,
    pub sinks: SinkConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Single-rule severity at or above which an alert is malicious
    /// regardless of the anomaly verdict.
    pub critical_severity_cutoff: u8,
    pub recent_alert_buffer_size: usize,
    pub rule_aggregation: SeverityAggregation,
    /// Overrides the threshold persisted in the model artifact.
    pub initial_threshold: Option<f64>,
    pub adaptive: AdaptiveConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    /// Scored records between threshold recomputations.
    pub window_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RulesConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReplayConfig {
    pub path: String,
    /// Delay between replayed records; 0 replays as fast as possible.
    pub interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SinkConfig {
    /// Records between stats snapshots pushed to sinks.
    pub stats_interval_records: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            rules: RulesConfig::default(),
            model: ModelConfig::default(),
            replay: ReplayConfig::default(),
            database: DatabaseConfig::default(),
            sinks: SinkConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            critical_severity_cutoff: 8,
            recent_alert_buffer_size: 256,
            rule_aggregation: SeverityAggregation::Sum,
            initial_threshold: None,
            adaptive: AdaptiveConfig::default(),
        }
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_size: 500,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: "rules/rules.yaml".into(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "data/model.json".into(),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            path: "data/traffic.jsonl".into(),
            interval_ms: 1000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/alerts.db".into(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            stats_interval_records: 100,
        }
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.engine.critical_severity_cutoff, 8);
        assert_eq!(config.engine.recent_alert_buffer_size, 256);
        assert!(!config.engine.adaptive.enabled);
        assert_eq!(config.sinks.stats_interval_records, 100);
        assert!(config.engine.initial_threshold.is_none());
    }

    #[test]
    fn partial_toml_overrides_merge_with_defaults() {
        let toml_src = "
[engine]
critical_severity_cutoff = 6
initial_threshold = 0.8

[engine.adaptive]
enabled = true
window_size = 50
";
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.engine.critical_severity_cutoff, 6);
        assert_eq!(config.engine.initial_threshold, Some(0.8));
        assert!(config.engine.adaptive.enabled);
        assert_eq!(config.engine.adaptive.window_size, 50);
        // untouched sections keep defaults
        assert_eq!(config.database.path, "data/alerts.db");
        assert_eq!(config.engine.rule_aggregation, SeverityAggregation::Sum);
    }

    #[test]
    fn aggregation_parses_from_toml() {
        let config: Config = toml::from_str("[engine]\nrule_aggregation = \"max\"\n").unwrap();
        assert_eq!(config.engine.rule_aggregation, SeverityAggregation::Max);
    }
}
