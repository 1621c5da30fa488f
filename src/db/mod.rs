pub mod schema;

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::core::Alert;

/// A persisted alert row, as the dashboard reads it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAlert {
    pub id: i64,
    pub flow_ts: String,
    pub src: String,
    pub dst: String,
    pub severity: String,
    pub fired_rules: String,
    pub rule_severity: u8,
    pub anomaly_score: f64,
    pub threshold: f64,
    pub is_outlier: bool,
    pub rationale: String,
    pub created_at: String,
}

pub struct AlertStore {
    conn: Connection,
}

/// Thread-safe wrapper around AlertStore.
#[derive(Clone)]
pub struct SharedAlertStore {
    inner: Arc<Mutex<AlertStore>>,
}

impl SharedAlertStore {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let store = AlertStore::open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(store)),
        })
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let store = AlertStore::open_in_memory()?;
        Ok(Self {
            inner: Arc::new(Mutex::new(store)),
        })
    }

    /// Persist one fused alert.
    pub fn store_alert(&self, alert: &Alert) -> Result<(), rusqlite::Error> {
        let store = self.inner.lock().unwrap();
        store.store_alert(alert)
    }

    /// Most recent alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<StoredAlert>, rusqlite::Error> {
        let store = self.inner.lock().unwrap();
        store.recent_alerts(limit)
    }

    /// Alerts of one severity class, newest first.
    pub fn alerts_with_severity(
        &self,
        severity: &str,
        limit: usize,
    ) -> Result<Vec<StoredAlert>, rusqlite::Error> {
        let store = self.inner.lock().unwrap();
        store.alerts_with_severity(severity, limit)
    }

    /// Count of stored alerts per severity class.
    pub fn severity_counts(&self) -> Result<Vec<(String, i64)>, rusqlite::Error> {
        let store = self.inner.lock().unwrap();
        store.severity_counts()
    }

    /// Total stored alert count.
    pub fn alert_count(&self) -> Result<usize, rusqlite::Error> {
        let store = self.inner.lock().unwrap();
        store.alert_count()
    }
}

impl AlertStore {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn store_alert(&self, alert: &Alert) -> Result<(), rusqlite::Error> {
        let fired_rules = alert.rules.fired_ids().join(",");
        let rule_hits = serde_json::to_string(&alert.rules.fired).unwrap_or_default();
        self.conn.execute(
            "INSERT INTO alerts (
                flow_ts, src, dst, severity, fired_rules, rule_severity,
                anomaly_score, threshold, is_outlier, rationale, rule_hits, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                alert.record.timestamp.to_rfc3339(),
                alert.record.src,
                alert.record.dst,
                alert.severity.as_str(),
                fired_rules,
                alert.rules.severity,
                alert.anomaly.score,
                alert.anomaly.threshold,
                alert.anomaly.is_outlier,
                alert.rationale,
                rule_hits,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<StoredAlert>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, flow_ts, src, dst, severity, fired_rules, rule_severity,
                    anomaly_score, threshold, is_outlier, rationale, created_at
             FROM alerts ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit], row_to_alert)?;
        rows.collect()
    }

    pub fn alerts_with_severity(
        &self,
        severity: &str,
        limit: usize,
    ) -> Result<Vec<StoredAlert>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, flow_ts, src, dst, severity, fired_rules, rule_severity,
                    anomaly_score, threshold, is_outlier, rationale, created_at
             FROM alerts WHERE severity = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![severity, limit], row_to_alert)?;
        rows.collect()
    }

    pub fn severity_counts(&self) -> Result<Vec<(String, i64)>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT severity, COUNT(*) FROM alerts GROUP BY severity ORDER BY severity",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }

    pub fn alert_count(&self) -> Result<usize, rusqlite::Error> {
        self.conn
            .query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
    }
}

fn row_to_alert(row: &rusqlite::Row<'_>) -> Result<StoredAlert, rusqlite::Error> {
    Ok(StoredAlert {
        id: row.get(0)?,
        flow_ts: row.get(1)?,
        src: row.get(2)?,
        dst: row.get(3)?,
        severity: row.get(4)?,
        fired_rules: row.get(5)?,
        rule_severity: row.get(6)?,
        anomaly_score: row.get(7)?,
        threshold: row.get(8)?,
        is_outlier: row.get(9)?,
        rationale: row.get(10)?,
        created_at: row.get(11)?,
    })
}
