//! # Kobuki Protocol Constants and Types
//!
//! Core protocol definitions for the Kobuki serial link.
//!
//! ```text
//! ┌──────┬──────┬────────┬──────────────────────────────┬──────────┐
//! │ 0xAA │ 0x55 │ length │ payload (length bytes)       │ checksum │
//! └──────┴──────┴────────┴──────────────────────────────┴──────────┘
//! payload = [id][len][data...] repeated until exhausted
//! ```

use bytes::Bytes;

/// Packet header bytes (always 0xAA 0x55)
pub const HEADER: [u8; 2] = [0xAA, 0x55];

/// Offset of the length byte within a frame
pub const LENGTH_OFFSET: usize = 2;

/// Largest payload the one-byte length field can describe
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

/// Bytes in a frame besides the payload: header(2) + length(1) + checksum(1)
pub const FRAME_OVERHEAD: usize = 4;

/// Sub-packet header size: id(1) + length(1)
pub const SUB_PACKET_HEADER_SIZE: usize = 2;

/// Outbound base control command id (speed + radius)
pub const COMMAND_BASE_CONTROL: u8 = 0x01;

/// Base control command data length: speed i16 + radius i16
pub const BASE_CONTROL_LENGTH: u8 = 4;

/// Sensor sub-packet identifiers understood by this driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubPacketKind {
    /// Timestamp, bumper/cliff/wheel-drop flags, encoders, PWM, battery
    CoreSensors,
    /// Docking infra-red receivers
    DockInfraRed,
    /// Gyro heading and angular rate
    Inertia,
    /// Raw cliff sensor ADC readings
    Cliff,
    /// Wheel motor currents
    Current,
    /// Hardware version
    HardwareVersion,
    /// Firmware version
    FirmwareVersion,
    /// General purpose digital and analog inputs
    GpInput,
}

impl SubPacketKind {
    /// All kinds in id order
    pub const ALL: [SubPacketKind; 8] = [
        SubPacketKind::CoreSensors,
        SubPacketKind::DockInfraRed,
        SubPacketKind::Inertia,
        SubPacketKind::Cliff,
        SubPacketKind::Current,
        SubPacketKind::HardwareVersion,
        SubPacketKind::FirmwareVersion,
        SubPacketKind::GpInput,
    ];

    /// Look up a kind by its wire id
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x01 => Some(SubPacketKind::CoreSensors),
            0x03 => Some(SubPacketKind::DockInfraRed),
            0x04 => Some(SubPacketKind::Inertia),
            0x05 => Some(SubPacketKind::Cliff),
            0x06 => Some(SubPacketKind::Current),
            0x0A => Some(SubPacketKind::HardwareVersion),
            0x0B => Some(SubPacketKind::FirmwareVersion),
            0x10 => Some(SubPacketKind::GpInput),
            _ => None,
        }
    }

    /// Wire id of this kind
    pub fn id(self) -> u8 {
        match self {
            SubPacketKind::CoreSensors => 0x01,
            SubPacketKind::DockInfraRed => 0x03,
            SubPacketKind::Inertia => 0x04,
            SubPacketKind::Cliff => 0x05,
            SubPacketKind::Current => 0x06,
            SubPacketKind::HardwareVersion => 0x0A,
            SubPacketKind::FirmwareVersion => 0x0B,
            SubPacketKind::GpInput => 0x10,
        }
    }

    /// Data length the firmware sends for this kind
    pub fn expected_length(self) -> usize {
        match self {
            SubPacketKind::CoreSensors => 15,
            SubPacketKind::DockInfraRed => 3,
            SubPacketKind::Inertia => 7,
            SubPacketKind::Cliff => 6,
            SubPacketKind::Current => 2,
            SubPacketKind::HardwareVersion => 4,
            SubPacketKind::FirmwareVersion => 4,
            SubPacketKind::GpInput => 16,
        }
    }
}

/// A frame whose checksum has been verified.
///
/// Only the framer can construct one, so holding a `ValidatedPacket` is proof
/// that the bytes passed the checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPacket {
    bytes: Bytes,
    payload_offset: usize,
}

impl ValidatedPacket {
    pub(crate) fn new(bytes: Bytes, length_offset: usize) -> Self {
        Self {
            bytes,
            payload_offset: length_offset + 1,
        }
    }

    /// Complete frame bytes (header, length, payload, checksum)
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Payload bytes between the length byte and the checksum
    pub fn payload(&self) -> Bytes {
        self.bytes.slice(self.payload_offset..self.bytes.len() - 1)
    }

    /// Total frame length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the frame carries no payload
    pub fn is_empty(&self) -> bool {
        self.bytes.len() <= self.payload_offset + 1
    }
}

/// One `[id][len][data]` segment of a packet payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubPacket {
    /// Sub-packet id byte
    pub id: u8,

    /// Data bytes (exactly the declared length)
    pub data: Bytes,
}

impl SubPacket {
    /// Declared data length
    pub fn length(&self) -> usize {
        self.data.len()
    }

    /// Known kind for this id, if any
    pub fn kind(&self) -> Option<SubPacketKind> {
        SubPacketKind::from_id(self.id)
    }
}
