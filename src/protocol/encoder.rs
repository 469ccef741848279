//! # Kobuki Command Encoder
//!
//! Encodes velocity setpoints into base-control packets.
//!
//! The base does not take `(v, w)` directly. It takes a signed speed in mm/s
//! and a turning radius in mm, both i16:
//!
//! | Motion          | radius        | speed                          |
//! |-----------------|---------------|--------------------------------|
//! | Straight        | 0             | v                              |
//! | Pure rotation   | 1             | w · wheelbase / 2              |
//! | Arc             | v / w         | w · (radius ± wheelbase / 2)   |

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::checksum::xor_checksum;
use super::packet::*;
use crate::error::{KobukiError, Result};

/// Radius value meaning "drive straight"
pub const STRAIGHT_RADIUS: i16 = 0;

/// Radius value meaning "spin in place"
pub const PURE_ROTATION_RADIUS: i16 = 1;

/// Angular velocities below this (rad/s) are treated as straight motion
pub const ANGULAR_EPSILON: f64 = 1e-4;

/// Linear velocities below this (m/s) with nonzero rotation are pure rotation
pub const LINEAR_EPSILON: f64 = 1e-4;

/// Device command range for speed (mm/s)
pub const SPEED_MAX: i16 = i16::MAX;
/// Device command range for speed (mm/s)
pub const SPEED_MIN: i16 = i16::MIN;

/// Velocity setpoint supplied by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocityCommand {
    /// Forward velocity in m/s
    pub linear_v: f64,

    /// Rotational velocity in rad/s (positive = counter-clockwise)
    pub angular_w: f64,
}

impl VelocityCommand {
    pub fn new(linear_v: f64, angular_w: f64) -> Self {
        Self { linear_v, angular_w }
    }

    /// Zero velocity
    pub fn stop() -> Self {
        Self::default()
    }
}

/// Native base-control representation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BaseControl {
    /// Speed in mm/s
    pub speed: i16,

    /// Turning radius in mm (0 = straight, 1 = rotate in place)
    pub radius: i16,
}

/// Values that fell outside the device range and were clamped.
///
/// Each field holds the requested (unclamped) value when clamping happened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandClamp {
    pub requested_speed: Option<f64>,
    pub requested_radius: Option<f64>,
    pub applied: BaseControl,
}

/// Result of encoding one command
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedCommand {
    /// The values written on the wire
    pub control: BaseControl,

    /// Complete outbound frame
    pub frame: Bytes,

    /// Set when any value had to be clamped
    pub clamped: Option<CommandClamp>,
}

/// Serializes velocity commands for a base with a given wheelbase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandEncoder {
    wheelbase_m: f64,
}

impl CommandEncoder {
    /// Create an encoder
    ///
    /// # Arguments
    ///
    /// * `wheelbase_m` - Distance between the drive wheels in meters
    pub fn new(wheelbase_m: f64) -> Self {
        Self { wheelbase_m }
    }

    /// Map a velocity setpoint to native speed/radius and frame it
    ///
    /// # Examples
    ///
    /// ```
    /// use kobuki_driver::protocol::encoder::{CommandEncoder, VelocityCommand};
    ///
    /// let encoder = CommandEncoder::new(0.23);
    /// let encoded = encoder.encode(VelocityCommand::new(0.3, 0.0));
    /// assert_eq!(encoded.control.speed, 300);
    /// assert_eq!(encoded.control.radius, 0);
    /// assert!(encoded.clamped.is_none());
    /// ```
    pub fn encode(&self, command: VelocityCommand) -> EncodedCommand {
        let (speed_mm, radius_mm) = self.speed_and_radius(command);

        let (speed, speed_clamped) = clamp_to_i16(speed_mm);
        let (radius, radius_clamped) = clamp_to_i16(radius_mm);
        let control = BaseControl { speed, radius };

        let clamped = (speed_clamped || radius_clamped).then(|| CommandClamp {
            requested_speed: speed_clamped.then_some(speed_mm),
            requested_radius: radius_clamped.then_some(radius_mm),
            applied: control,
        });

        EncodedCommand {
            control,
            frame: encode_base_control_frame(control),
            clamped,
        }
    }

    /// Unclamped (speed mm/s, radius mm) for a setpoint
    fn speed_and_radius(&self, command: VelocityCommand) -> (f64, f64) {
        let v_mm = command.linear_v * 1000.0;
        let w = command.angular_w;
        let half_base_mm = self.wheelbase_m * 1000.0 / 2.0;

        if w.abs() < ANGULAR_EPSILON {
            return (v_mm, STRAIGHT_RADIUS as f64);
        }

        let radius_mm = v_mm / w;
        if command.linear_v.abs() < LINEAR_EPSILON || radius_mm.abs() <= 1.0 {
            return (half_base_mm * w, PURE_ROTATION_RADIUS as f64);
        }

        // Speed is taken at the outer wheel
        let speed_mm = if radius_mm > 0.0 {
            (radius_mm + half_base_mm) * w
        } else {
            (radius_mm - half_base_mm) * w
        };
        (speed_mm, radius_mm)
    }
}

/// Round and saturate to i16, reporting whether saturation happened.
///
/// NaN maps to zero and counts as clamped.
fn clamp_to_i16(value: f64) -> (i16, bool) {
    let rounded = value.round();
    if rounded.is_nan() {
        (0, true)
    } else if rounded > SPEED_MAX as f64 {
        (SPEED_MAX, true)
    } else if rounded < SPEED_MIN as f64 {
        (SPEED_MIN, true)
    } else {
        (rounded as i16, false)
    }
}

/// Encode a base-control command into a complete frame
///
/// Frame layout: `AA 55 06 01 04 <speed LE> <radius LE> <checksum>`
pub fn encode_base_control_frame(control: BaseControl) -> Bytes {
    let mut payload = BytesMut::with_capacity(SUB_PACKET_HEADER_SIZE + BASE_CONTROL_LENGTH as usize);
    payload.put_u8(COMMAND_BASE_CONTROL);
    payload.put_u8(BASE_CONTROL_LENGTH);
    payload.put_i16_le(control.speed);
    payload.put_i16_le(control.radius);

    // A 6-byte payload is always within the length field's range
    frame_payload(&payload)
}

/// Wrap a payload in header, length and checksum
///
/// # Errors
///
/// Returns error if payload exceeds MAX_PAYLOAD_SIZE (255 bytes)
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(KobukiError::Protocol(format!(
            "Payload size {} exceeds maximum {}",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }
    Ok(frame_payload(payload))
}

fn frame_payload(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(FRAME_OVERHEAD + payload.len());
    frame.put_slice(&HEADER);
    frame.put_u8(payload.len() as u8);
    frame.put_slice(payload);

    let checksum = xor_checksum(&frame[LENGTH_OFFSET..]);
    frame.put_u8(checksum);
    frame.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decoder::decode_base_control;
    use crate::protocol::demux::demux;
    use crate::protocol::framer::{Framed, FramerConfig, PacketFramer};

    const WHEELBASE: f64 = 0.23;

    fn encoder() -> CommandEncoder {
        CommandEncoder::new(WHEELBASE)
    }

    #[test]
    fn test_straight_motion() {
        let encoded = encoder().encode(VelocityCommand::new(0.5, 0.0));
        assert_eq!(encoded.control, BaseControl { speed: 500, radius: STRAIGHT_RADIUS });
        assert!(encoded.clamped.is_none());
    }

    #[test]
    fn test_reverse_straight_motion() {
        let encoded = encoder().encode(VelocityCommand::new(-0.25, 0.0));
        assert_eq!(encoded.control, BaseControl { speed: -250, radius: 0 });
    }

    #[test]
    fn test_near_zero_rotation_is_straight() {
        let encoded = encoder().encode(VelocityCommand::new(0.2, 0.00001));
        assert_eq!(encoded.control.radius, STRAIGHT_RADIUS);
        assert_eq!(encoded.control.speed, 200);
    }

    #[test]
    fn test_pure_rotation() {
        let encoded = encoder().encode(VelocityCommand::new(0.0, 1.0));
        assert_eq!(encoded.control.radius, PURE_ROTATION_RADIUS);
        // 1 rad/s * 115 mm
        assert_eq!(encoded.control.speed, 115);

        let encoded = encoder().encode(VelocityCommand::new(0.0, -1.0));
        assert_eq!(encoded.control.radius, PURE_ROTATION_RADIUS);
        assert_eq!(encoded.control.speed, -115);
    }

    #[test]
    fn test_arc_speed_at_outer_wheel() {
        let encoded = encoder().encode(VelocityCommand::new(0.5, 1.0));
        assert_eq!(encoded.control.radius, 500);
        assert_eq!(encoded.control.speed, 615);

        let encoded = encoder().encode(VelocityCommand::new(-0.5, 1.0));
        assert_eq!(encoded.control.radius, -500);
        assert_eq!(encoded.control.speed, -615);

        let encoded = encoder().encode(VelocityCommand::new(0.5, -1.0));
        assert_eq!(encoded.control.radius, -500);
        assert_eq!(encoded.control.speed, 615);
    }

    #[test]
    fn test_absurd_speed_is_clamped() {
        let encoded = encoder().encode(VelocityCommand::new(1000.0, 0.0));
        assert_eq!(encoded.control.speed, SPEED_MAX);

        let clamp = encoded.clamped.expect("speed should be clamped");
        assert_eq!(clamp.requested_speed, Some(1_000_000.0));
        assert_eq!(clamp.requested_radius, None);
        assert_eq!(clamp.applied, encoded.control);
    }

    #[test]
    fn test_negative_speed_is_clamped() {
        let encoded = encoder().encode(VelocityCommand::new(-1000.0, 0.0));
        assert_eq!(encoded.control.speed, SPEED_MIN);
        assert!(encoded.clamped.is_some());
    }

    #[test]
    fn test_huge_radius_is_clamped() {
        let encoded = encoder().encode(VelocityCommand::new(0.5, 0.001));
        assert_eq!(encoded.control.radius, i16::MAX);
        let clamp = encoded.clamped.unwrap();
        assert!(clamp.requested_radius.is_some());
        assert!(clamp.requested_speed.is_none());
    }

    #[test]
    fn test_nan_is_clamped_to_zero() {
        let encoded = encoder().encode(VelocityCommand::new(f64::NAN, 0.0));
        assert_eq!(encoded.control.speed, 0);
        assert!(encoded.clamped.is_some());
    }

    #[test]
    fn test_frame_structure() {
        let frame = encode_base_control_frame(BaseControl { speed: 300, radius: -2 });
        assert_eq!(frame.len(), 10);
        assert_eq!(&frame[..2], &HEADER);
        assert_eq!(frame[2], 6);
        assert_eq!(frame[3], COMMAND_BASE_CONTROL);
        assert_eq!(frame[4], BASE_CONTROL_LENGTH);
        assert_eq!(&frame[5..7], &300i16.to_le_bytes());
        assert_eq!(&frame[7..9], &(-2i16).to_le_bytes());
        assert_eq!(xor_checksum(&frame[2..]), 0);
    }

    #[test]
    fn test_encode_frame_payload_too_large() {
        assert!(encode_frame(&[0u8; 256]).is_err());
        assert!(encode_frame(&[0u8; 255]).is_ok());
    }

    #[test]
    fn test_encode_frame_empty_payload() {
        let frame = encode_frame(&[]).unwrap();
        assert_eq!(frame.as_ref(), &[0xAA, 0x55, 0x00, 0x00]);
    }

    #[test]
    fn test_command_survives_framer_and_decoder() {
        let commands = [
            VelocityCommand::new(0.3, 0.0),
            VelocityCommand::new(0.0, 0.8),
            VelocityCommand::new(0.25, -0.5),
            VelocityCommand::new(1000.0, 0.0),
            VelocityCommand::new(0.5, 0.001),
        ];

        for command in commands {
            let encoded = encoder().encode(command);
            let mut framer = PacketFramer::new(FramerConfig::default());
            let mut frames: Vec<Framed> = framer.feed(&encoded.frame).collect();
            assert_eq!(frames.len(), 1);

            let packet = match frames.remove(0) {
                Framed::Packet(packet) => packet,
                other => panic!("expected packet, got {:?}", other),
            };
            let sub = demux(packet).next().unwrap().unwrap();
            assert_eq!(sub.id, COMMAND_BASE_CONTROL);
            assert_eq!(decode_base_control(&sub.data).unwrap(), encoded.control);
        }
    }
}
