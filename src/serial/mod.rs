//! # Serial Communication Module
//!
//! Handles the serial byte channel to the Kobuki base.
//!
//! This module handles:
//! - Opening the serial port (8N1, configured baud)
//! - Falling back to well-known device paths
//! - Splitting the port into independently owned read and write halves
//! - Writing complete command frames

pub mod port_trait;

use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::{KobukiError, Result};
use port_trait::{SerialReader, SerialWriter};

/// Device paths tried after the configured port (in order of preference)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/kobuki",  // udev symlink installed with the base's rules
    "/dev/ttyUSB0", // FTDI USB-to-serial adapter
];

/// An open serial channel, split into halves
///
/// The read half belongs to the read loop; the write half is shared by the
/// command path.
pub struct SerialLink {
    reader: Box<dyn SerialReader>,
    writer: Box<dyn SerialWriter>,
    device_path: String,
}

impl SerialLink {
    pub fn new(
        reader: Box<dyn SerialReader>,
        writer: Box<dyn SerialWriter>,
        device_path: impl Into<String>,
    ) -> Self {
        Self {
            reader,
            writer,
            device_path: device_path.into(),
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn into_parts(self) -> (Box<dyn SerialReader>, Box<dyn SerialWriter>, String) {
        (self.reader, self.writer, self.device_path)
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

/// Opens serial links to a Kobuki base
pub struct KobukiSerial;

impl KobukiSerial {
    /// Open the configured port, falling back to the default device paths
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` listing every path tried
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use kobuki_driver::config::SerialConfig;
    /// use kobuki_driver::serial::KobukiSerial;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let link = KobukiSerial::open(&SerialConfig::default())?;
    ///     println!("Connected to: {}", link.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open(config: &SerialConfig) -> Result<SerialLink> {
        let paths = candidate_paths(&config.port);
        Self::open_with_paths(&paths, config.baud_rate)
    }

    /// Open the first of `paths` that succeeds
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<SerialLink> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened Kobuki device at {} ({} baud)", path, baud_rate);
                    let (reader, writer) = port_trait::split(port);
                    return Ok(SerialLink::new(Box::new(reader), Box::new(writer), *path));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(KobukiError::SerialPortNotFound(paths.join(", ")))
    }

    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        use tokio_serial::SerialPortBuilderExt;

        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| KobukiError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }
}

/// Configured port first, then defaults not already listed
fn candidate_paths(configured: &str) -> Vec<&str> {
    let mut paths = Vec::with_capacity(DEFAULT_DEVICE_PATHS.len() + 1);
    if !configured.is_empty() {
        paths.push(configured);
    }
    for path in DEFAULT_DEVICE_PATHS {
        if !paths.contains(path) {
            paths.push(*path);
        }
    }
    paths
}

/// Write one complete frame and flush it
///
/// # Errors
///
/// Returns `Serial` if the write or flush fails
pub async fn write_frame(writer: &mut dyn SerialWriter, frame: &[u8]) -> Result<()> {
    writer
        .write_all(frame)
        .await
        .map_err(|e| KobukiError::Serial(format!("Failed to write frame: {}", e)))?;

    writer
        .flush()
        .await
        .map_err(|e| KobukiError::Serial(format!("Failed to flush serial port: {}", e)))?;

    debug!("Sent frame ({} bytes)", frame.len());
    Ok(())
}
