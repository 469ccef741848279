//! # Kobuki Sub-packet Decoder
//!
//! Decodes sensor sub-packets (core sensors, docking IR, inertia, cliff,
//! current, versions, general purpose input). All multi-byte fields are
//! little-endian.

use super::packet::*;
use super::encoder::BaseControl;
use crate::error::{KobukiError, Result};

/// Core sensor data, sent by the base at 50Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoreSensors {
    /// Device timestamp in ms (wraps at 65536)
    pub timestamp: u16,

    /// Bumper flags (bit 0 right, bit 1 central, bit 2 left)
    pub bumper: u8,

    /// Wheel drop flags (bit 0 right, bit 1 left)
    pub wheel_drop: u8,

    /// Cliff flags (bit 0 right, bit 1 central, bit 2 left)
    pub cliff: u8,

    /// Left wheel encoder ticks
    pub left_encoder: u16,

    /// Right wheel encoder ticks
    pub right_encoder: u16,

    /// Left wheel PWM
    pub left_pwm: i8,

    /// Right wheel PWM
    pub right_pwm: i8,

    /// Button flags
    pub buttons: u8,

    /// Charger state
    pub charger: u8,

    /// Battery voltage in 0.1V units
    pub battery: u8,

    /// Over-current flags (bit 0 left, bit 1 right)
    pub over_current: u8,
}

impl CoreSensors {
    /// Battery voltage in volts
    pub fn battery_voltage(&self) -> f32 {
        self.battery as f32 / 10.0
    }
}

/// Docking IR receiver readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DockInfraRed {
    pub right: u8,
    pub central: u8,
    pub left: u8,
}

/// Gyro heading data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Inertia {
    /// Heading in hundredths of a degree
    pub angle: i16,

    /// Angular rate in hundredths of a degree per second
    pub angle_rate: i16,
}

impl Inertia {
    /// Heading in radians
    pub fn angle_rad(&self) -> f64 {
        (self.angle as f64 / 100.0).to_radians()
    }

    /// Angular rate in rad/s
    pub fn angle_rate_rad(&self) -> f64 {
        (self.angle_rate as f64 / 100.0).to_radians()
    }
}

/// Cliff sensor ADC readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cliff {
    pub right: u16,
    pub central: u16,
    pub left: u16,
}

/// Wheel motor currents in 10mA units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Current {
    pub left: u8,
    pub right: u8,
}

/// Hardware or firmware version triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// General purpose input readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpInput {
    /// Digital input flags (4 channels)
    pub digital: u16,

    /// Analog inputs (12-bit ADC)
    pub analog: [u16; 4],
}

/// Decoded sensor sub-packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorData {
    CoreSensors(CoreSensors),
    DockInfraRed(DockInfraRed),
    Inertia(Inertia),
    Cliff(Cliff),
    Current(Current),
    HardwareVersion(Version),
    FirmwareVersion(Version),
    GpInput(GpInput),
}

impl SensorData {
    /// Sub-packet kind this data came from
    pub fn kind(&self) -> SubPacketKind {
        match self {
            SensorData::CoreSensors(_) => SubPacketKind::CoreSensors,
            SensorData::DockInfraRed(_) => SubPacketKind::DockInfraRed,
            SensorData::Inertia(_) => SubPacketKind::Inertia,
            SensorData::Cliff(_) => SubPacketKind::Cliff,
            SensorData::Current(_) => SubPacketKind::Current,
            SensorData::HardwareVersion(_) => SubPacketKind::HardwareVersion,
            SensorData::FirmwareVersion(_) => SubPacketKind::FirmwareVersion,
            SensorData::GpInput(_) => SubPacketKind::GpInput,
        }
    }
}

/// Decode a sensor sub-packet of a known kind
///
/// # Errors
///
/// Returns error if the data length differs from the kind's layout
pub fn decode_sensor(kind: SubPacketKind, data: &[u8]) -> Result<SensorData> {
    check_length(kind, data)?;

    let decoded = match kind {
        SubPacketKind::CoreSensors => SensorData::CoreSensors(decode_core_sensors(data)?),
        SubPacketKind::DockInfraRed => SensorData::DockInfraRed(DockInfraRed {
            right: data[0],
            central: data[1],
            left: data[2],
        }),
        SubPacketKind::Inertia => SensorData::Inertia(Inertia {
            angle: i16::from_le_bytes([data[0], data[1]]),
            angle_rate: i16::from_le_bytes([data[2], data[3]]),
        }),
        SubPacketKind::Cliff => SensorData::Cliff(Cliff {
            right: u16::from_le_bytes([data[0], data[1]]),
            central: u16::from_le_bytes([data[2], data[3]]),
            left: u16::from_le_bytes([data[4], data[5]]),
        }),
        SubPacketKind::Current => SensorData::Current(Current {
            left: data[0],
            right: data[1],
        }),
        SubPacketKind::HardwareVersion => SensorData::HardwareVersion(decode_version(data)),
        SubPacketKind::FirmwareVersion => SensorData::FirmwareVersion(decode_version(data)),
        SubPacketKind::GpInput => {
            let word = |i: usize| u16::from_le_bytes([data[i], data[i + 1]]);
            SensorData::GpInput(GpInput {
                digital: word(0),
                analog: [word(2), word(4), word(6), word(8)],
            })
        }
    };

    Ok(decoded)
}

/// Decode the core sensors sub-packet (odometry source)
///
/// # Arguments
///
/// * `data` - Sub-packet data (15 bytes)
pub fn decode_core_sensors(data: &[u8]) -> Result<CoreSensors> {
    check_length(SubPacketKind::CoreSensors, data)?;

    Ok(CoreSensors {
        timestamp: u16::from_le_bytes([data[0], data[1]]),
        bumper: data[2],
        wheel_drop: data[3],
        cliff: data[4],
        left_encoder: u16::from_le_bytes([data[5], data[6]]),
        right_encoder: u16::from_le_bytes([data[7], data[8]]),
        left_pwm: data[9] as i8,
        right_pwm: data[10] as i8,
        buttons: data[11],
        charger: data[12],
        battery: data[13],
        over_current: data[14],
    })
}

/// Decode an outbound base-control sub-packet
///
/// The base never sends this; it is the inverse of the command encoder and
/// is used to inspect captured command streams.
pub fn decode_base_control(data: &[u8]) -> Result<BaseControl> {
    if data.len() != BASE_CONTROL_LENGTH as usize {
        return Err(KobukiError::Protocol(format!(
            "Base control data must be {} bytes, got {}",
            BASE_CONTROL_LENGTH,
            data.len()
        )));
    }

    Ok(BaseControl {
        speed: i16::from_le_bytes([data[0], data[1]]),
        radius: i16::from_le_bytes([data[2], data[3]]),
    })
}

fn decode_version(data: &[u8]) -> Version {
    Version {
        patch: data[0],
        minor: data[1],
        major: data[2],
    }
}

fn check_length(kind: SubPacketKind, data: &[u8]) -> Result<()> {
    let expected = kind.expected_length();
    if data.len() != expected {
        return Err(KobukiError::Protocol(format!(
            "{:?} data must be {} bytes, got {}",
            kind,
            expected,
            data.len()
        )));
    }
    Ok(())
}
