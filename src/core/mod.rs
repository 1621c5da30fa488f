pub mod engine;
pub mod pipeline;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered numeric feature columns the detectors were fitted on.
///
/// The schema is part of the model artifact; rules resolve column names to
/// vector indices against it at load time. A record whose vector length
/// disagrees with the schema is rejected, never padded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    columns: Vec<String>,
}

impl FeatureSchema {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// Transport protocol of the observed flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Other => "other",
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "icmp" => Ok(Protocol::Icmp),
            "other" => Ok(Protocol::Other),
            _ => Err(format!("unknown protocol {s:?}")),
        }
    }
}

/// TCP-style control flags observed on the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowFlag {
    Syn,
    Ack,
    Fin,
    Rst,
    Psh,
    Urg,
}

impl FromStr for FlowFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "syn" => Ok(FlowFlag::Syn),
            "ack" => Ok(FlowFlag::Ack),
            "fin" => Ok(FlowFlag::Fin),
            "rst" => Ok(FlowFlag::Rst),
            "psh" => Ok(FlowFlag::Psh),
            "urg" => Ok(FlowFlag::Urg),
            _ => Err(format!("unknown flow flag {s:?}")),
        }
    }
}

/// One observed flow with its features already extracted.
///
/// `values` is a fixed-order vector matching the engine's `FeatureSchema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub values: Vec<f64>,
    pub protocol: Protocol,
    #[serde(default)]
    pub flags: Vec<FlowFlag>,
    pub src: String,
    pub dst: String,
    pub timestamp: DateTime<Utc>,
}

impl FeatureRecord {
    pub fn has_flag(&self, flag: FlowFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// One signature rule that matched a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredRule {
    pub id: String,
    pub severity: u8,
}

/// Outcome of evaluating every rule against one record.
///
/// `fired` preserves rule-sequence order; `severity` is the configured
/// aggregate (sum capped at the scale maximum, or max).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleVerdict {
    pub fired: Vec<FiredRule>,
    pub severity: u8,
}

impl RuleVerdict {
    pub fn none_fired(&self) -> bool {
        self.fired.is_empty()
    }

    /// Highest single-rule severity, 0 when nothing fired.
    pub fn max_single_severity(&self) -> u8 {
        self.fired.iter().map(|r| r.severity).max().unwrap_or(0)
    }

    pub fn fired_ids(&self) -> Vec<&str> {
        self.fired.iter().map(|r| r.id.as_str()).collect()
    }
}

/// Outcome of the anomaly scorer for one record.
///
/// The threshold actually used is carried in the verdict so every decision
/// is reproducible after the engine has adapted its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    /// Isolation score in [0, 1]; larger means more anomalous.
    pub score: f64,
    pub is_outlier: bool,
    pub threshold: f64,
}

/// Fused severity class of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityClass {
    Benign,
    Suspicious,
    Malicious,
}

impl SeverityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityClass::Benign => "benign",
            SeverityClass::Suspicious => "suspicious",
            SeverityClass::Malicious => "malicious",
        }
    }
}

impl fmt::Display for SeverityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fused output for one record: both verdicts, the combined class, and a
/// generated rationale. Identical verdicts always yield byte-identical
/// rationale text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub record: FeatureRecord,
    pub rules: RuleVerdict,
    pub anomaly: AnomalyVerdict,
    pub severity: SeverityClass,
    pub rationale: String,
}

/// Snapshot of one engine's counters, handed to sinks on each tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    /// Records scored by both detectors (rejected records not included).
    pub processed: u64,
    pub benign: u64,
    pub alerted: u64,
    /// Records rejected for schema mismatch.
    pub rejected: u64,
    /// Anomaly threshold currently in effect.
    pub threshold: f64,
    /// Times the adaptive threshold has been recomputed.
    pub threshold_updates: u64,
}

/// Degraded-mode notice for a record the engine refused to score.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectNotice {
    pub src: String,
    pub dst: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}
