//! # Odometry Engine
//!
//! Converts raw 16-bit wheel encoder ticks into wheel joint state, body
//! velocity and an integrated 2D pose.
//!
//! Elapsed time always comes from a monotonic clock ([`Instant`]), never
//! from wall-clock time, so clock adjustments cannot produce negative or
//! inflated velocities.

use serde::Serialize;
use std::fmt;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::RobotConfig;

/// Signed tick delta between two 16-bit encoder readings
///
/// The difference is taken modulo 2^16 and read as i16, so a counter that
/// wraps forward gives a small positive delta and one that wraps backward a
/// small negative delta.
///
/// # Examples
///
/// ```
/// use kobuki_driver::odometry::tick_delta;
///
/// assert_eq!(tick_delta(65530, 10), 16);
/// assert_eq!(tick_delta(10, 65530), -16);
/// ```
pub fn tick_delta(last: u16, current: u16) -> i16 {
    current.wrapping_sub(last) as i16
}

/// Per-wheel encoder state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelState {
    /// Last accepted raw tick reading
    pub last_tick: u16,

    /// Accumulated wheel rotation in radians
    pub last_angle_rad: f64,

    /// Accumulated wheel travel in millimeters
    pub last_distance_mm: f64,
}

/// Encoder state for both wheels
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EncoderState {
    pub left: WheelState,
    pub right: WheelState,

    /// Monotonic time of the last accepted sample; `None` until seeded
    pub last_timestamp: Option<Instant>,
}

/// Wheel joint positions and velocities
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct JointState {
    pub left_angle_rad: f64,
    pub right_angle_rad: f64,
    pub left_velocity: f64,
    pub right_velocity: f64,
}

/// Latest odometry output
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OdometrySnapshot {
    /// Linear velocity in m/s
    pub linear_v: f64,

    /// Angular velocity in rad/s
    pub angular_w: f64,

    /// Cumulative position in meters
    pub x: f64,
    pub y: f64,

    /// Heading in radians, normalized to (-π, π]
    pub heading: f64,

    /// Wheel joint state
    pub joints: JointState,
}

/// Why a tick sample was not applied
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleRejected {
    /// Sample is not newer than the previous one
    NonPositiveElapsed,

    /// Implied wheel speed exceeds the configured physical bound
    ImplausibleSpeed { speed_mps: f64, limit_mps: f64 },
}

impl fmt::Display for SampleRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleRejected::NonPositiveElapsed => write!(f, "sample is not newer than the previous one"),
            SampleRejected::ImplausibleSpeed { speed_mps, limit_mps } => write!(
                f,
                "implied wheel speed {:.2} m/s exceeds {:.2} m/s",
                speed_mps, limit_mps
            ),
        }
    }
}

/// Differential-drive odometry integrator
#[derive(Debug, Clone)]
pub struct OdometryEngine {
    tick_to_mm: f64,
    tick_to_rad: f64,
    wheelbase_m: f64,
    max_wheel_speed_mps: f64,
    encoders: EncoderState,
    snapshot: OdometrySnapshot,
}

impl OdometryEngine {
    pub fn new(config: &RobotConfig) -> Self {
        Self {
            tick_to_mm: config.tick_to_mm,
            tick_to_rad: config.tick_to_rad,
            wheelbase_m: config.wheelbase_m,
            max_wheel_speed_mps: config.max_wheel_speed_mps,
            encoders: EncoderState::default(),
            snapshot: OdometrySnapshot::default(),
        }
    }

    /// Apply a tick sample, returning the current snapshot
    ///
    /// A rejected sample leaves all state untouched and returns the previous
    /// snapshot.
    pub fn on_tick_sample(&mut self, left_tick: u16, right_tick: u16, timestamp: Instant) -> OdometrySnapshot {
        match self.apply_sample(left_tick, right_tick, timestamp) {
            Ok(snapshot) => snapshot,
            Err(reason) => {
                warn!("Discarding odometry sample: {}", reason);
                self.snapshot
            }
        }
    }

    /// Apply a tick sample, reporting why it was rejected if it was
    ///
    /// The first sample after construction or [`reset`](Self::reset) only
    /// seeds the encoder state.
    pub fn apply_sample(
        &mut self,
        left_tick: u16,
        right_tick: u16,
        timestamp: Instant,
    ) -> Result<OdometrySnapshot, SampleRejected> {
        let Some(last_timestamp) = self.encoders.last_timestamp else {
            debug!("Seeding encoders at left={} right={}", left_tick, right_tick);
            self.encoders.left.last_tick = left_tick;
            self.encoders.right.last_tick = right_tick;
            self.encoders.last_timestamp = Some(timestamp);
            return Ok(self.snapshot);
        };

        let elapsed = match timestamp.checked_duration_since(last_timestamp) {
            Some(d) if !d.is_zero() => d.as_secs_f64(),
            _ => return Err(SampleRejected::NonPositiveElapsed),
        };

        let left_ticks = tick_delta(self.encoders.left.last_tick, left_tick) as f64;
        let right_ticks = tick_delta(self.encoders.right.last_tick, right_tick) as f64;

        let left_mm = left_ticks * self.tick_to_mm;
        let right_mm = right_ticks * self.tick_to_mm;

        let fastest_mps = left_mm.abs().max(right_mm.abs()) / 1000.0 / elapsed;
        if fastest_mps > self.max_wheel_speed_mps {
            return Err(SampleRejected::ImplausibleSpeed {
                speed_mps: fastest_mps,
                limit_mps: self.max_wheel_speed_mps,
            });
        }

        let left_rad = left_ticks * self.tick_to_rad;
        let right_rad = right_ticks * self.tick_to_rad;

        let left = &mut self.encoders.left;
        left.last_tick = left_tick;
        left.last_angle_rad += left_rad;
        left.last_distance_mm += left_mm;

        let right = &mut self.encoders.right;
        right.last_tick = right_tick;
        right.last_angle_rad += right_rad;
        right.last_distance_mm += right_mm;

        self.encoders.last_timestamp = Some(timestamp);

        let distance_m = (left_mm + right_mm) / 2.0 / 1000.0;
        let rotation_rad = (right_mm - left_mm) / 1000.0 / self.wheelbase_m;

        // Midpoint heading for the translation over this interval
        let snapshot = &mut self.snapshot;
        let mid_heading = snapshot.heading + rotation_rad / 2.0;
        snapshot.x += distance_m * mid_heading.cos();
        snapshot.y += distance_m * mid_heading.sin();
        snapshot.heading = normalize_angle(snapshot.heading + rotation_rad);

        snapshot.linear_v = distance_m / elapsed;
        snapshot.angular_w = rotation_rad / elapsed;
        snapshot.joints = JointState {
            left_angle_rad: self.encoders.left.last_angle_rad,
            right_angle_rad: self.encoders.right.last_angle_rad,
            left_velocity: left_rad / elapsed,
            right_velocity: right_rad / elapsed,
        };

        Ok(*snapshot)
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> OdometrySnapshot {
        self.snapshot
    }

    /// Current encoder state
    pub fn encoders(&self) -> &EncoderState {
        &self.encoders
    }

    /// Clear pose, velocities and encoder history
    pub fn reset(&mut self) {
        self.encoders = EncoderState::default();
        self.snapshot = OdometrySnapshot::default();
    }
}

fn normalize_angle(angle: f64) -> f64 {
    angle.sin().atan2(angle.cos())
}
