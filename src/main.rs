//! # Kobuki Driver
//!
//! Connects to a Kobuki base over serial, reports odometry and records
//! telemetry.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Parse command line, load configuration
//!    - Set up logging (console, plus daily rolling files when configured)
//!    - Start the telemetry writer when enabled
//!    - Open the serial connection and start the read loop
//!
//! 2. **Main Loop**
//!    - Log odometry, counters and battery voltage every few seconds
//!    - Exit on Ctrl+C or loss of the serial connection
//!
//! 3. **Graceful Shutdown**
//!    - Send a zero-velocity command and close the connection
//!    - Flush telemetry
//!
//! # Examples
//!
//! ```bash
//! kobuki-driver --config config/default.toml --port /dev/ttyUSB0
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use kobuki_driver::config::{Config, LoggingConfig, TelemetryConfig};
use kobuki_driver::driver::events::{DriverEvent, EventKind, Subscription};
use kobuki_driver::driver::Kobuki;
use kobuki_driver::protocol::decoder::SensorData;
use kobuki_driver::protocol::packet::SubPacketKind;
use kobuki_driver::telemetry::{self, TelemetryLogger, TELEMETRY_QUEUE_SIZE};

/// Interval between status log messages
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Log file name prefix inside `[logging].directory`
const LOG_FILE_NAME: &str = "kobuki-driver.log";

#[derive(Parser, Debug)]
#[command(name = "kobuki-driver", version, about = "Serial driver for Kobuki mobile bases")]
struct Args {
    /// TOML configuration file; built-in defaults are used if it does not exist
    #[arg(short, long, value_name = "PATH", default_value = "config/default.toml")]
    config: PathBuf,

    /// Serial device, overrides [serial].port
    #[arg(short, long, value_name = "DEVICE")]
    port: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, loaded) = load_config(&args.config)?;
    if let Some(port) = args.port {
        config.serial.port = port;
    }
    config.validate().context("invalid configuration")?;

    let _log_guard = init_logging(&config.logging)?;

    info!("Kobuki driver v{} starting...", env!("CARGO_PKG_VERSION"));
    if loaded {
        info!("Loaded configuration from {}", args.config.display());
    } else {
        warn!("{} not found, using built-in defaults", args.config.display());
    }

    let kobuki = Kobuki::new(config.clone());

    let lost = Arc::new(Notify::new());
    let _subscriptions = watch_events(&kobuki, Arc::clone(&lost));
    let telemetry = TelemetryTask::start(&kobuki, &config.telemetry)?;

    kobuki.run().await.context("failed to connect to the base")?;
    info!("Connected to {}", kobuki.device_path().unwrap_or_default());

    let result = run_monitor(&kobuki, &lost).await;

    if let Err(e) = kobuki.close().await {
        warn!("Connection closed with error: {}", e);
    }
    log_status(&kobuki);

    if let Some(telemetry) = telemetry {
        telemetry.finish().await;
    }

    result
}

/// Load `path`, or defaults when it does not exist
fn load_config(path: &Path) -> Result<(Config, bool)> {
    if !path.exists() {
        return Ok((Config::default(), false));
    }
    let config = Config::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    Ok((config, true))
}

/// Install the tracing subscriber
///
/// `RUST_LOG` takes precedence over `[logging].level`. The returned guard
/// flushes the file writer on drop.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    if logging.directory.is_empty() {
        tracing_subscriber::registry().with(filter).with(console).init();
        return Ok(None);
    }

    std::fs::create_dir_all(&logging.directory)
        .with_context(|| format!("failed to create log directory {}", logging.directory))?;
    let appender = tracing_appender::rolling::daily(&logging.directory, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Ok(Some(guard))
}

/// Log device versions and signal `lost` when the connection drops
fn watch_events(kobuki: &Kobuki, lost: Arc<Notify>) -> Vec<Subscription> {
    let versions = |event: &DriverEvent| match event {
        DriverEvent::Sensor(SensorData::HardwareVersion(v)) => {
            info!("Hardware version {}.{}.{}", v.major, v.minor, v.patch)
        }
        DriverEvent::Sensor(SensorData::FirmwareVersion(v)) => {
            info!("Firmware version {}.{}.{}", v.major, v.minor, v.patch)
        }
        _ => {}
    };

    vec![
        kobuki.subscribe(EventKind::Sensor(SubPacketKind::HardwareVersion), versions),
        kobuki.subscribe(EventKind::Sensor(SubPacketKind::FirmwareVersion), versions),
        kobuki.subscribe(EventKind::ConnectionLost, move |_| lost.notify_one()),
    ]
}

fn log_status(kobuki: &Kobuki) {
    let odometry = kobuki.get_odometry();
    let stats = kobuki.stats();
    info!(
        "Pose x={:.3} y={:.3} heading={:.3} | v={:.3} w={:.3} | packets={} invalid={} discarded={}",
        odometry.x,
        odometry.y,
        odometry.heading,
        odometry.linear_v,
        odometry.angular_w,
        stats.packets_received,
        stats.invalid_packets,
        stats.discarded_samples
    );

    if let Some(SensorData::CoreSensors(core)) = kobuki.get_sensor_snapshot(SubPacketKind::CoreSensors) {
        info!("Battery {:.1} V", core.battery_voltage());
    }
}

async fn run_monitor(kobuki: &Kobuki, lost: &Notify) -> Result<()> {
    let mut status = interval(STATUS_INTERVAL);
    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = status.tick() => log_status(kobuki),

            _ = lost.notified() => anyhow::bail!("connection to the base was lost"),

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                return Ok(());
            }
        }
    }
}

/// Odometry telemetry writer fed from driver events
struct TelemetryTask {
    subscription: Subscription,
    handle: JoinHandle<kobuki_driver::error::Result<()>>,
}

impl TelemetryTask {
    fn start(kobuki: &Kobuki, config: &TelemetryConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }

        let logger = TelemetryLogger::new(config).context("failed to start telemetry")?;
        let (tx, rx) = mpsc::channel(TELEMETRY_QUEUE_SIZE);

        let subscription = kobuki.subscribe(EventKind::Odometry, move |event| {
            if let DriverEvent::Odometry(snapshot) = event {
                // A full queue drops the snapshot; the next one supersedes it
                let _ = tx.try_send(*snapshot);
            }
        });

        Ok(Some(Self {
            subscription,
            handle: telemetry::spawn_writer(logger, rx),
        }))
    }

    /// Stop feeding the writer and wait for it to flush
    async fn finish(self) {
        self.subscription.release();
        match self.handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Telemetry writer failed: {}", e),
            Err(e) => error!("Telemetry writer panicked: {}", e),
        }
    }
}
