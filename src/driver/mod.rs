//! # Driver Module
//!
//! The connection state machine, background read loop and consumer API for a
//! Kobuki base.
//!
//! This module handles:
//! - Opening and closing the serial channel (`Closed → Opening → Running → Stopping → Closed`)
//! - Running the read loop on a dedicated tokio task
//! - Applying decoded sensor data and odometry under one state lock
//! - Encoding and writing velocity commands
//! - Publishing typed events to subscribers

pub mod events;
pub mod state;

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{KobukiError, Result};
use crate::odometry::{JointState, OdometrySnapshot};
use crate::protocol::decoder::SensorData;
use crate::protocol::encoder::VelocityCommand;
use crate::protocol::packet::SubPacketKind;
use crate::serial::port_trait::{SerialReader, SerialWriter};
use crate::serial::{self, KobukiSerial, SerialLink};
use events::{DriverEvent, DriverWarning, EventBus, EventKind, Subscription};
use state::{lock, DriverStats, SensorPipeline, SensorState};

/// Bytes requested per serial read
const READ_BUFFER_SIZE: usize = 512;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Running,
    Stopping,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Opening => "opening",
            ConnectionState::Running => "running",
            ConnectionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

struct Shared {
    config: RwLock<Config>,
    state: watch::Sender<ConnectionState>,
    sensors: Mutex<SensorState>,
    writer: tokio::sync::Mutex<Option<Box<dyn SerialWriter>>>,
    /// Identifies the current connection; bumped under the writer lock
    epoch: AtomicU64,
    reader_task: Mutex<Option<JoinHandle<Result<()>>>>,
    device_path: Mutex<Option<String>>,
    events: EventBus,
}

impl Shared {
    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Move `from → to` atomically, or report the state that blocked it
    fn transition(&self, from: ConnectionState, to: ConnectionState, operation: &'static str) -> Result<()> {
        let mut blocked = None;
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                blocked = Some(*state);
                false
            }
        });

        match blocked {
            None => {
                debug!("Connection {} -> {}", from, to);
                Ok(())
            }
            Some(state) => Err(KobukiError::InvalidState { operation, state }),
        }
    }

    fn set_state(&self, to: ConnectionState) {
        let from = self.state.send_replace(to);
        if from != to {
            debug!("Connection {} -> {}", from, to);
        }
    }

    fn config(&self) -> Config {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Retire the current connection and return the epoch of the next one
    async fn next_epoch(&self) -> u64 {
        let mut writer = self.writer.lock().await;
        writer.take();
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Tear down connection `epoch` after a transport fault
    ///
    /// Faults from a connection that has already been replaced only produce
    /// the error.
    async fn connection_lost(&self, epoch: u64, reason: String) -> KobukiError {
        {
            let mut writer = self.writer.lock().await;
            if !self.is_current(epoch) {
                debug!("Ignoring fault from a previous connection: {}", reason);
                return KobukiError::Serial(reason);
            }
            error!("Serial connection lost: {}", reason);
            writer.take();
            lock(&self.sensors).enabled = false;
            self.set_state(ConnectionState::Closed);
        }
        self.events.publish(&DriverEvent::ConnectionLost(reason.clone()));
        KobukiError::Serial(reason)
    }

    /// Wait for the read loop of a replaced connection to exit
    async fn finish_previous_loop(&self) {
        let task = self.reader_task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(handle) = task else {
            return;
        };
        match handle.await {
            Ok(Ok(())) => debug!("Previous read loop finished"),
            Ok(Err(e)) => debug!("Previous read loop ended with: {}", e),
            Err(e) => warn!("Previous read loop aborted: {}", e),
        }
    }

    /// Write one frame, publishing it on success
    async fn write_frame(&self, frame: Bytes) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(port) = writer.as_mut() else {
            return Err(KobukiError::NotConnected);
        };
        let epoch = self.epoch.load(Ordering::SeqCst);

        let written = serial::write_frame(&mut **port, &frame).await;
        drop(writer);

        if let Err(e) = written {
            return Err(self.connection_lost(epoch, e.to_string()).await);
        }

        self.events.publish(&DriverEvent::RawDataSent(frame));
        Ok(())
    }
}

/// Handle to a Kobuki base
///
/// Cloning is cheap; every clone drives the same connection, so `stop()` can
/// be called from any task.
///
/// # Examples
///
/// ```no_run
/// use kobuki_driver::config::Config;
/// use kobuki_driver::driver::Kobuki;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let kobuki = Kobuki::new(Config::default());
///     kobuki.run().await?;
///     kobuki.enable();
///     kobuki.set_command(0.2, 0.0).await?;
///     kobuki.close().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Kobuki {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Kobuki {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kobuki")
            .field("state", &self.state())
            .field("device_path", &self.device_path())
            .finish_non_exhaustive()
    }
}

impl Kobuki {
    pub fn new(config: Config) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            shared: Arc::new(Shared {
                sensors: Mutex::new(SensorState::new(&config)),
                config: RwLock::new(config),
                state,
                writer: tokio::sync::Mutex::new(None),
                epoch: AtomicU64::new(0),
                reader_task: Mutex::new(None),
                device_path: Mutex::new(None),
                events: EventBus::new(),
            }),
        }
    }

    /// Replace the configuration and connect
    ///
    /// Only valid while closed. Odometry, snapshots and counters start fresh.
    pub async fn init(&self, config: Config) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Closed {
            return Err(KobukiError::InvalidState { operation: "init", state });
        }
        config.validate()?;

        *lock(&self.shared.sensors) = SensorState::new(&config);
        *self.shared.config.write().unwrap_or_else(PoisonError::into_inner) = config;

        self.run().await
    }

    /// Open the configured serial port and start the read loop
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless closed, or the open failure; the state
    /// returns to `Closed` and nothing is retried
    pub async fn run(&self) -> Result<()> {
        self.shared.transition(ConnectionState::Closed, ConnectionState::Opening, "run")?;

        let serial = self.shared.config().serial;
        let opened = tokio::task::spawn_blocking(move || KobukiSerial::open(&serial))
            .await
            .unwrap_or_else(|e| Err(KobukiError::Serial(format!("Serial open task failed: {}", e))));

        match opened {
            Ok(link) => {
                self.start(link).await;
                Ok(())
            }
            Err(e) => {
                error!("Failed to open serial channel: {}", e);
                self.shared.set_state(ConnectionState::Closed);
                Err(e)
            }
        }
    }

    /// Start on an already opened link
    pub async fn run_with_link(&self, link: SerialLink) -> Result<()> {
        self.shared.transition(ConnectionState::Closed, ConnectionState::Opening, "run")?;
        self.start(link).await;
        Ok(())
    }

    async fn start(&self, link: SerialLink) {
        let (reader, writer, device_path) = link.into_parts();
        let config = self.shared.config();

        let epoch = self.shared.next_epoch().await;
        self.shared.finish_previous_loop().await;

        *self.shared.writer.lock().await = Some(writer);
        *self
            .shared
            .device_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(device_path.clone());

        self.shared.set_state(ConnectionState::Running);

        let task = tokio::spawn(read_loop(
            Arc::downgrade(&self.shared),
            epoch,
            reader,
            Duration::from_millis(config.serial.read_timeout_ms),
            Duration::from_millis(config.serial.serial_timeout_ms),
        ));

        *self
            .shared
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);

        info!("Kobuki running on {}", device_path);
    }

    /// Stop the read loop and release the serial channel
    ///
    /// Returns the read loop's transport fault, if it ended with one.
    /// Stopping a closed driver is a no-op.
    pub async fn stop(&self) -> Result<()> {
        if self
            .shared
            .transition(ConnectionState::Running, ConnectionState::Stopping, "stop")
            .is_ok()
        {
            info!("Stopping Kobuki driver");
        }

        let task = self
            .shared
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let result = match task {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(KobukiError::Serial(format!("Read loop aborted: {}", e))),
            },
            None => Ok(()),
        };

        self.shared.writer.lock().await.take();
        lock(&self.shared.sensors).enabled = false;
        self.shared.set_state(ConnectionState::Closed);

        result
    }

    /// Send a best-effort zero-velocity command, then stop
    pub async fn close(&self) -> Result<()> {
        if self.connected() {
            let encoded = {
                let mut sensors = lock(&self.shared.sensors);
                sensors.command = VelocityCommand::stop();
                sensors.encoder.encode(VelocityCommand::stop())
            };
            if let Err(e) = self.shared.write_frame(encoded.frame).await {
                warn!("Failed to send stop command while closing: {}", e);
            }
        }

        self.stop().await
    }

    /// Store a new velocity setpoint and send it
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` unless running, or `Serial` if the write fails
    pub async fn set_command(&self, linear_v: f64, angular_w: f64) -> Result<()> {
        self.ensure_running()?;
        lock(&self.shared.sensors).command = VelocityCommand::new(linear_v, angular_w);
        self.send_command().await
    }

    /// Send the current setpoint, or zero velocity while disabled
    pub async fn send_command(&self) -> Result<()> {
        self.ensure_running()?;

        let encoded = {
            let mut sensors = lock(&self.shared.sensors);
            let command = if sensors.enabled {
                sensors.command
            } else {
                VelocityCommand::stop()
            };
            let encoded = sensors.encoder.encode(command);
            if encoded.clamped.is_some() {
                sensors.stats.clamped_commands += 1;
            }
            encoded
        };

        if let Some(clamp) = encoded.clamped {
            warn!(
                "Command clamped to speed={} radius={}",
                clamp.applied.speed, clamp.applied.radius
            );
            self.shared
                .events
                .publish(&DriverEvent::Warning(DriverWarning::CommandClamped(clamp)));
        }

        self.shared.write_frame(encoded.frame).await
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Running => Ok(()),
            _ => Err(KobukiError::NotConnected),
        }
    }

    /// Allow non-zero velocity commands
    pub fn enable(&self) {
        let mut sensors = lock(&self.shared.sensors);
        if !sensors.enabled {
            info!("Motors enabled");
        }
        sensors.enabled = true;
    }

    /// Zero the setpoint and block further motion; sends a stop if running
    pub async fn disable(&self) -> Result<()> {
        {
            let mut sensors = lock(&self.shared.sensors);
            if sensors.enabled {
                info!("Motors disabled");
            }
            sensors.enabled = false;
            sensors.command = VelocityCommand::stop();
        }

        if self.connected() {
            self.send_command().await?;
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.shared.sensors).enabled
    }

    /// Clear odometry pose, velocities and encoder history
    pub fn reset(&self) {
        lock(&self.shared.sensors).odometry.reset();
        info!("Odometry reset");
    }

    pub fn get_odometry(&self) -> OdometrySnapshot {
        lock(&self.shared.sensors).odometry.snapshot()
    }

    pub fn get_joint_state(&self) -> JointState {
        lock(&self.shared.sensors).odometry.snapshot().joints
    }

    /// Latest decoded data of one sub-packet kind
    pub fn get_sensor_snapshot(&self, kind: SubPacketKind) -> Option<SensorData> {
        lock(&self.shared.sensors).snapshots.get(&kind).copied()
    }

    pub fn get_command(&self) -> VelocityCommand {
        lock(&self.shared.sensors).command
    }

    /// True while running
    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Running
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.current()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn stats(&self) -> DriverStats {
        lock(&self.shared.sensors).stats
    }

    /// Register a handler for one kind of event
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&DriverEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(kind, handler)
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Path of the open (or last opened) device
    pub fn device_path(&self) -> Option<String> {
        self.shared
            .device_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Read and process bytes for connection `epoch` until it stops running
async fn read_loop(
    shared: Weak<Shared>,
    epoch: u64,
    mut reader: Box<dyn SerialReader>,
    read_timeout: Duration,
    serial_timeout: Duration,
) -> Result<()> {
    let mut pipeline = SensorPipeline::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut last_data = Instant::now();
    let mut timeout_reported = false;

    debug!("Read loop started");

    loop {
        {
            let Some(shared) = shared.upgrade() else {
                return Ok(());
            };
            if shared.current() != ConnectionState::Running || !shared.is_current(epoch) {
                break;
            }
        }

        let read = tokio::time::timeout(read_timeout, reader.read(&mut buf)).await;

        let Some(shared) = shared.upgrade() else {
            return Ok(());
        };
        if !shared.is_current(epoch) {
            break;
        }

        match read {
            Err(_) => {
                let silent_for = last_data.elapsed();
                if silent_for >= serial_timeout && !timeout_reported {
                    timeout_reported = true;
                    warn!("No data from the base for {:?}", silent_for);
                    lock(&shared.sensors).stats.serial_timeouts += 1;
                    shared.events.publish(&DriverEvent::SerialTimeout { silent_for });
                }
            }
            Ok(Ok(0)) => {
                return Err(shared.connection_lost(epoch, "serial channel closed".to_string()).await);
            }
            Ok(Ok(n)) => {
                let now = Instant::now();
                last_data = now;
                timeout_reported = false;

                let events = pipeline.process(&buf[..n], now, &shared.sensors);
                shared.events.publish_all(events);
            }
            Ok(Err(e)) => {
                return Err(shared.connection_lost(epoch, format!("read failed: {}", e)).await);
            }
        }
    }

    debug!("Read loop finished");
    Ok(())
}
