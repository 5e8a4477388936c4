use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flyer_proto::Notification;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct LogRecord<'a> {
    ts_unix_ms: i64,
    notification: &'a Notification,
}

/// Per-run telemetry log: one JSON line for every notification received.
pub struct NavLog {
    path: PathBuf,
    out: BufWriter<File>,
    records: u64,
    failed: bool,
}

impl NavLog {
    pub fn open(dir: impl AsRef<Path>, file: &str) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;
        let path = dir.join(file);
        let f = File::create(&path).with_context(|| format!("create nav log {}", path.display()))?;
        info!("navlog: writing {}", path.display());
        Ok(Self { path, out: BufWriter::new(f), records: 0, failed: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn is_disabled(&self) -> bool {
        self.failed
    }

    /// Append one notification. The first write error is logged once and
    /// turns the log off; the flight carries on without it.
    pub fn record(&mut self, notification: &Notification) {
        if self.failed {
            return;
        }
        match self.write_line(notification) {
            Ok(()) => self.records += 1,
            Err(e) => {
                warn!("navlog: disabled after write error on {}: {:#}", self.path.display(), e);
                self.failed = true;
            }
        }
    }

    fn write_line(&mut self, notification: &Notification) -> Result<()> {
        let rec = LogRecord {
            ts_unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            notification,
        };
        serde_json::to_writer(&mut self.out, &rec).context("encode nav log record")?;
        self.out.write_all(b"\n").context("write nav log")?;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.out.flush().context("flush nav log")?;
        anyhow::ensure!(
            !self.failed,
            "nav log {} incomplete: only {} records written",
            self.path.display(),
            self.records
        );
        info!("navlog: closed {} ({} records)", self.path.display(), self.records);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flyer_proto::{Position3, Velocity3};

    #[test]
    fn records_one_line_per_notification() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = NavLog::open(dir.path().join("Logs"), "NavLog.txt").unwrap();
        log.record(&Notification::LocalPosition(Position3::new(1.0, 2.0, -3.0)));
        log.record(&Notification::LocalVelocity(Velocity3::default()));
        log.record(&Notification::State { armed: true, guided: true });
        assert_eq!(log.records(), 3);
        let path = log.path().to_path_buf();
        log.close().unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<serde_json::Value> =
            text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["notification"]["kind"], "local_position");
        assert_eq!(lines[0]["notification"]["down"], -3.0);
        assert_eq!(lines[2]["notification"]["armed"], true);
        assert!(lines[1]["ts_unix_ms"].as_i64().unwrap() > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn write_failure_disables_the_log() {
        let mut log = NavLog::open("/dev", "full").unwrap();
        for _ in 0..1000 {
            log.record(&Notification::State { armed: false, guided: false });
        }
        assert!(log.is_disabled());
        assert!(log.records() < 1000);
        assert!(log.close().is_err());
    }
}
