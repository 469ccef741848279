//! Shared sensor state and the inbound processing pipeline

use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::events::{DriverEvent, DriverWarning, InvalidPacket, InvalidReason};
use crate::config::Config;
use crate::odometry::OdometryEngine;
use crate::protocol::decoder::SensorData;
use crate::protocol::demux::{demux, dispatch, Dispatch};
use crate::protocol::encoder::{CommandEncoder, VelocityCommand};
use crate::protocol::framer::{Framed, FramerConfig, PacketFramer};
use crate::protocol::packet::SubPacketKind;

/// Running counters kept by the driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverStats {
    /// Checksum-valid frames
    pub packets_received: u64,

    /// Frames or sub-packets rejected as invalid
    pub invalid_packets: u64,

    /// Sub-packets with an id no decoder handles
    pub unknown_sub_packets: u64,

    /// Known sub-packets whose data did not match the layout
    pub malformed_sub_packets: u64,

    /// Odometry samples that were not applied
    pub discarded_samples: u64,

    /// Commands clamped to the native range
    pub clamped_commands: u64,

    /// Silent periods reported as serial timeouts
    pub serial_timeouts: u64,
}

/// Mutable driver state guarded by one lock
#[derive(Debug)]
pub(crate) struct SensorState {
    pub odometry: OdometryEngine,
    pub encoder: CommandEncoder,
    pub snapshots: HashMap<SubPacketKind, SensorData>,
    pub command: VelocityCommand,
    pub enabled: bool,
    pub stats: DriverStats,
}

impl SensorState {
    pub fn new(config: &Config) -> Self {
        Self {
            odometry: OdometryEngine::new(&config.robot),
            encoder: CommandEncoder::new(config.robot.wheelbase_m),
            snapshots: HashMap::new(),
            command: VelocityCommand::stop(),
            enabled: false,
            stats: DriverStats::default(),
        }
    }
}

/// Lock the state, recovering the data if a holder panicked
pub(crate) fn lock(state: &Mutex<SensorState>) -> std::sync::MutexGuard<'_, SensorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One unit of work, in arrival order
#[derive(Debug)]
enum Step {
    Received(Bytes),
    Invalid(InvalidPacket, Counter),
    Decoded(SensorData),
    Unknown(u8),
}

#[derive(Debug, Clone, Copy)]
enum Counter {
    Frame,
    Malformed,
}

/// Span of the base's u16 millisecond timestamp
const DEVICE_CLOCK_RANGE: Duration = Duration::from_millis(u16::MAX as u64 + 1);

/// How far the base's clock may run ahead of host read times before it is
/// no longer trusted
const DEVICE_CLOCK_SLACK: Duration = Duration::from_secs(1);

/// Assigns a monotonic instant to each odometry sample
///
/// Instants follow the base's own millisecond clock, anchored at the host
/// time of the first read: each sample advances the previous instant by the
/// wrapping device timestamp delta. Samples buffered into one read therefore
/// keep their true spacing, and a repeated device timestamp yields zero
/// elapsed time.
///
/// The host read times bound the device delta. When the base claims more
/// time passed than the host saw (plus [`DEVICE_CLOCK_SLACK`]), or the host
/// gap exceeds the range of the u16 timestamp, the host gap is used instead.
#[derive(Debug, Default)]
struct SampleClock {
    last: Option<Stamp>,
}

#[derive(Debug, Clone, Copy)]
struct Stamp {
    read_at: Instant,
    device_ms: u16,
    assigned: Instant,
}

impl SampleClock {
    fn stamp(&mut self, read_at: Instant, device_ms: u16) -> Instant {
        let assigned = match self.last {
            Some(prev) => {
                let device = Duration::from_millis(device_ms.wrapping_sub(prev.device_ms) as u64);
                let host = read_at.saturating_duration_since(prev.read_at);
                if host >= DEVICE_CLOCK_RANGE || device > host + DEVICE_CLOCK_SLACK {
                    debug!(
                        "Device clock jumped {:?} over a {:?} host gap, using host time",
                        device, host
                    );
                    prev.assigned + host
                } else {
                    prev.assigned + device
                }
            }
            None => read_at,
        };
        self.last = Some(Stamp {
            read_at,
            device_ms,
            assigned,
        });
        assigned
    }
}

/// Turns raw serial bytes into state updates and events
#[derive(Debug)]
pub(crate) struct SensorPipeline {
    framer: PacketFramer,
    clock: SampleClock,
}

impl SensorPipeline {
    pub fn new() -> Self {
        Self {
            framer: PacketFramer::new(FramerConfig::default()),
            clock: SampleClock::default(),
        }
    }

    /// Process one read's worth of bytes
    ///
    /// Parsing happens without the state lock; the lock is then taken once to
    /// apply every step. The returned events are in processing order and are
    /// meant to be published after the lock is released.
    pub fn process(&mut self, bytes: &[u8], read_at: Instant, state: &Mutex<SensorState>) -> Vec<DriverEvent> {
        let steps = self.parse(bytes);
        if steps.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::with_capacity(steps.len() + 1);
        let mut state = lock(state);
        for step in steps {
            self.apply(step, read_at, &mut state, &mut events);
        }
        events
    }

    fn parse(&mut self, bytes: &[u8]) -> Vec<Step> {
        let mut steps = Vec::new();

        for framed in self.framer.feed(bytes) {
            let packet = match framed {
                Framed::Packet(packet) => packet,
                Framed::Invalid(rejected) => {
                    steps.push(Step::Invalid(
                        InvalidPacket {
                            reason: InvalidReason::Checksum,
                            bytes: rejected,
                        },
                        Counter::Frame,
                    ));
                    continue;
                }
            };

            steps.push(Step::Received(packet.as_bytes().clone()));

            for sub in demux(packet) {
                let sub = match sub {
                    Ok(sub) => sub,
                    Err(tail) => {
                        steps.push(Step::Invalid(
                            InvalidPacket {
                                reason: InvalidReason::TruncatedSubPacket {
                                    id: tail.id,
                                    declared: tail.declared,
                                    available: tail.available,
                                },
                                bytes: tail.bytes,
                            },
                            Counter::Malformed,
                        ));
                        continue;
                    }
                };

                match dispatch(&sub) {
                    Dispatch::Decoded(data) => steps.push(Step::Decoded(data)),
                    Dispatch::Unknown(id) => steps.push(Step::Unknown(id)),
                    Dispatch::Malformed { kind, reason } => steps.push(Step::Invalid(
                        InvalidPacket {
                            reason: InvalidReason::MalformedSubPacket { kind, reason },
                            bytes: sub.data,
                        },
                        Counter::Malformed,
                    )),
                }
            }
        }

        steps
    }

    fn apply(&mut self, step: Step, read_at: Instant, state: &mut SensorState, events: &mut Vec<DriverEvent>) {
        match step {
            Step::Received(bytes) => {
                state.stats.packets_received += 1;
                events.push(DriverEvent::RawDataReceived(bytes));
            }
            Step::Invalid(invalid, counter) => {
                warn!("Invalid packet: {} ({} bytes)", invalid.reason, invalid.bytes.len());
                state.stats.invalid_packets += 1;
                if let Counter::Malformed = counter {
                    state.stats.malformed_sub_packets += 1;
                }
                events.push(DriverEvent::InvalidPacket(invalid));
            }
            Step::Unknown(id) => {
                debug!("Ignoring unknown sub-packet id 0x{:02X}", id);
                state.stats.unknown_sub_packets += 1;
            }
            Step::Decoded(data) => {
                state.snapshots.insert(data.kind(), data);
                events.push(DriverEvent::Sensor(data));

                if let SensorData::CoreSensors(core) = data {
                    let at = self.clock.stamp(read_at, core.timestamp);
                    match state.odometry.apply_sample(core.left_encoder, core.right_encoder, at) {
                        Ok(snapshot) => events.push(DriverEvent::Odometry(snapshot)),
                        Err(reason) => {
                            warn!("Discarding odometry sample: {}", reason);
                            state.stats.discarded_samples += 1;
                            events.push(DriverEvent::Warning(DriverWarning::SampleDiscarded(reason)));
                        }
                    }
                }
            }
        }
    }
}
