//! JSONL odometry logger with file rotation and retention

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::odometry::OdometrySnapshot;

const FILE_PREFIX: &str = "telemetry_";
const FILE_EXTENSION: &str = "jsonl";

/// One line of a telemetry file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    pub odometry: OdometrySnapshot,
}

impl TelemetryRecord {
    pub fn now(odometry: OdometrySnapshot) -> Self {
        Self {
            timestamp: Utc::now(),
            odometry,
        }
    }
}

struct OpenFile {
    path: PathBuf,
    writer: BufWriter<File>,
    records: usize,
}

/// Writes odometry records to rotating JSONL files
///
/// At most one record is written per `log_interval_ms`; a new file is started
/// every `max_records_per_file` records and only the newest
/// `max_files_to_keep` files are kept.
pub struct TelemetryLogger {
    dir: PathBuf,
    interval: Duration,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    current: Option<OpenFile>,
    last_logged: Option<Instant>,
    sequence: u64,
}

impl TelemetryLogger {
    /// Create the log directory and an idle logger
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        let dir = PathBuf::from(&config.log_dir);
        fs::create_dir_all(&dir)?;
        info!("Telemetry logging to {}", dir.display());

        Ok(Self {
            dir,
            interval: Duration::from_millis(config.log_interval_ms),
            max_records_per_file: config.max_records_per_file,
            max_files_to_keep: config.max_files_to_keep,
            current: None,
            last_logged: None,
            sequence: 0,
        })
    }

    /// Log a snapshot unless one was logged within the interval
    ///
    /// Returns whether a record was written.
    pub fn log(&mut self, odometry: OdometrySnapshot) -> Result<bool> {
        self.log_at(&TelemetryRecord::now(odometry), Instant::now())
    }

    /// Log a record as of monotonic time `now`
    pub fn log_at(&mut self, record: &TelemetryRecord, now: Instant) -> Result<bool> {
        if let Some(last) = self.last_logged {
            if now.saturating_duration_since(last) < self.interval {
                return Ok(false);
            }
        }

        if self
            .current
            .as_ref()
            .map_or(true, |file| file.records >= self.max_records_per_file)
        {
            self.rotate()?;
        }

        let line = serde_json::to_string(record)?;
        if let Some(file) = self.current.as_mut() {
            writeln!(file.writer, "{}", line)?;
            file.records += 1;
        }

        self.last_logged = Some(now);
        Ok(true)
    }

    /// Flush buffered records to disk
    pub fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.current.as_mut() {
            file.writer.flush()?;
        }
        Ok(())
    }

    /// Path of the file currently being written
    pub fn current_file(&self) -> Option<&Path> {
        self.current.as_ref().map(|file| file.path.as_path())
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut previous) = self.current.take() {
            previous.writer.flush()?;
            debug!("Closed {} after {} records", previous.path.display(), previous.records);
        }

        let name = format!(
            "{}{}_{:04}.{}",
            FILE_PREFIX,
            Utc::now().format("%Y%m%d_%H%M%S_%3f"),
            self.sequence,
            FILE_EXTENSION
        );
        self.sequence += 1;

        let path = self.dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Opened telemetry file {}", path.display());

        self.current = Some(OpenFile {
            path,
            writer: BufWriter::new(file),
            records: 0,
        });

        self.cleanup_old_files()
    }

    /// Remove all but the newest `max_files_to_keep` telemetry files
    fn cleanup_old_files(&self) -> Result<()> {
        let mut files = list_telemetry_files(&self.dir)?;
        if files.len() <= self.max_files_to_keep {
            return Ok(());
        }

        // Names sort oldest first
        files.sort();
        let to_remove = files.len() - self.max_files_to_keep;
        for path in files.iter().take(to_remove) {
            match fs::remove_file(path) {
                Ok(()) => debug!("Removed old telemetry file {}", path.display()),
                Err(e) => warn!("Failed to remove old telemetry file {}: {}", path.display(), e),
            }
        }
        Ok(())
    }
}

impl Drop for TelemetryLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to flush telemetry on shutdown: {}", e);
        }
    }
}

/// Telemetry files in `dir`, unsorted
pub fn list_telemetry_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_telemetry = path.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(FILE_EXTENSION)
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FILE_PREFIX));
        if is_telemetry {
            files.push(path);
        }
    }
    Ok(files)
}
