use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::ReplayConfig;
use crate::core::FeatureRecord;
use crate::error::Error;

/// A pull-based producer of traffic records. May be finite (a capture) or
/// unbounded (a live generator); the engine holds no source-side state.
pub trait TrafficSource {
    /// Next record, `None` when the source is exhausted.
    fn next_record(&mut self) -> Result<Option<FeatureRecord>, Error>;
}

/// Replays feature records captured as one JSON object per line.
///
/// Line format matches `FeatureRecord`'s serde representation; `values`
/// carries the numeric features in schema order. Malformed lines surface as
/// schema-mismatch errors carrying the line number; callers decide whether
/// to skip or abort.
pub struct JsonlReplaySource {
    lines: std::io::Lines<BufReader<File>>,
    path: String,
    line_no: usize,
}

impl JsonlReplaySource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            path: path.display().to_string(),
            line_no: 0,
        })
    }
}

impl TrafficSource for JsonlReplaySource {
    fn next_record(&mut self) -> Result<Option<FeatureRecord>, Error> {
        loop {
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            self.line_no += 1;
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line)
                .map(Some)
                .map_err(|e| {
                    Error::schema(format!("{}:{}: malformed record: {e}", self.path, self.line_no))
                });
        }
    }
}

/// Start the replay feeder in a blocking thread, pushing records into the
/// pipeline channel at the configured pace. Malformed lines are logged and
/// skipped; the feeder stops when the capture is exhausted or the pipeline
/// side hangs up.
pub fn start_replay_feeder(
    config: ReplayConfig,
    tx: mpsc::UnboundedSender<FeatureRecord>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut source = match JsonlReplaySource::open(&config.path) {
            Ok(s) => s,
            Err(e) => {
                warn!("cannot open replay capture {}: {e}", config.path);
                return;
            }
        };
        info!(path = %config.path, interval_ms = config.interval_ms, "replay feeder started");

        let mut sent: u64 = 0;
        let mut skipped: u64 = 0;
        loop {
            match source.next_record() {
                Ok(Some(record)) => {
                    if tx.send(record).is_err() {
                        info!("pipeline channel closed, stopping replay feeder");
                        return;
                    }
                    sent += 1;
                    if config.interval_ms > 0 {
                        std::thread::sleep(std::time::Duration::from_millis(config.interval_ms));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("skipping replay line: {e}");
                    skipped += 1;
                }
            }
        }
        info!("replay feeder finished: {sent} records sent, {skipped} skipped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FlowFlag, Protocol};
    use std::io::Write;

    const CAPTURE: &str = r#"{"values": [12.0, 840.0], "protocol": "tcp", "flags": ["syn", "ack"], "src": "10.0.0.4", "dst": "172.16.0.9", "timestamp": "2024-03-01T12:00:00Z"}
{"values": [3.0, 90.0], "protocol": "udp", "src": "10.0.0.5", "dst": "8.8.8.8", "timestamp": "2024-03-01T12:00:01Z"}

not json at all
{"values": [7.0, 120.0], "protocol": "icmp", "flags": [], "src": "10.0.0.6", "dst": "10.0.0.1", "timestamp": "2024-03-01T12:00:02Z"}
"#;

    fn capture_file() -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "flowsentry-capture-{}-{:?}.jsonl",
            std::process::id(),
            std::thread::current().id()
        ));
        let mut file = File::create(&path).unwrap();
        file.write_all(CAPTURE.as_bytes()).unwrap();
        path
    }

    #[test]
    fn replays_records_in_order() {
        let path = capture_file();
        let mut source = JsonlReplaySource::open(&path).unwrap();

        let first = source.next_record().unwrap().unwrap();
        assert_eq!(first.values, vec![12.0, 840.0]);
        assert_eq!(first.protocol, Protocol::Tcp);
        assert_eq!(first.flags, vec![FlowFlag::Syn, FlowFlag::Ack]);
        assert_eq!(first.src, "10.0.0.4");

        let second = source.next_record().unwrap().unwrap();
        assert_eq!(second.protocol, Protocol::Udp);
        // flags default to empty when absent
        assert!(second.flags.is_empty());

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn malformed_line_is_schema_error_with_location() {
        let path = capture_file();
        let mut source = JsonlReplaySource::open(&path).unwrap();
        source.next_record().unwrap();
        source.next_record().unwrap();

        // blank line is skipped, the garbage line errors
        let err = source.next_record().unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
        assert!(err.to_string().contains(":4:"), "{err}");

        // the source recovers on the next line
        let next = source.next_record().unwrap().unwrap();
        assert_eq!(next.protocol, Protocol::Icmp);
        assert!(source.next_record().unwrap().is_none());

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_capture_is_io_error() {
        assert!(matches!(
            JsonlReplaySource::open("no/such/capture.jsonl"),
            Err(Error::Io(_))
        ));
    }

    #[tokio::test]
    async fn feeder_pushes_records_into_channel() {
        let path = capture_file();
        let config = ReplayConfig { path: path.display().to_string(), interval_ms: 0 };
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = start_replay_feeder(config, tx);

        let mut received = Vec::new();
        while let Some(record) = rx.recv().await {
            received.push(record);
        }
        handle.join().unwrap();

        // 3 valid records, 1 garbage line skipped
        assert_eq!(received.len(), 3);
        assert_eq!(received[2].protocol, Protocol::Icmp);

        std::fs::remove_file(path).ok();
    }
}
