use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS alerts (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            flow_ts        TEXT NOT NULL,
            src            TEXT NOT NULL,
            dst            TEXT NOT NULL,
            severity       TEXT NOT NULL,
            fired_rules    TEXT NOT NULL, -- comma-joined rule ids
            rule_severity  INTEGER NOT NULL,
            anomaly_score  REAL NOT NULL,
            threshold      REAL NOT NULL,
            is_outlier     INTEGER NOT NULL,
            rationale      TEXT NOT NULL,
            rule_hits      TEXT, -- JSON
            created_at     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_alerts_severity ON alerts(severity);
        CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at DESC);
        ",
    )?;
    Ok(())
}
