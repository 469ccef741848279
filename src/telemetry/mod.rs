//! # Telemetry Module
//!
//! Handles odometry telemetry logging to JSONL files with rotation.
//!
//! This module handles:
//! - Formatting odometry snapshots as JSONL (JSON Lines)
//! - Writing to rotating log files (max N records per file)
//! - Retaining only the last M files
//! - Running the file writer off the async runtime

pub mod logger;

pub use logger::{TelemetryLogger, TelemetryRecord};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::Result;
use crate::odometry::OdometrySnapshot;

/// Snapshots queued between the driver and the telemetry writer
pub const TELEMETRY_QUEUE_SIZE: usize = 256;

/// Drain snapshots into `logger` on a blocking thread until every sender is dropped
pub fn spawn_writer(mut logger: TelemetryLogger, mut rx: mpsc::Receiver<OdometrySnapshot>) -> JoinHandle<Result<()>> {
    tokio::task::spawn_blocking(move || {
        let mut written: u64 = 0;
        while let Some(snapshot) = rx.blocking_recv() {
            if logger.log(snapshot)? {
                written += 1;
            }
        }
        logger.flush()?;
        debug!("Telemetry writer finished after {} records", written);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writer_drains_until_closed() {
        let dir = TempDir::new().unwrap();
        let config = TelemetryConfig {
            enabled: true,
            log_dir: dir.path().to_string_lossy().into_owned(),
            log_interval_ms: 1,
            ..TelemetryConfig::default()
        };
        let logger = TelemetryLogger::new(&config).unwrap();
        let (tx, rx) = mpsc::channel(TELEMETRY_QUEUE_SIZE);
        let handle = spawn_writer(logger, rx);

        tx.send(OdometrySnapshot::default()).await.unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        let files = logger::list_telemetry_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        let contents = std::fs::read_to_string(&files[0]).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
