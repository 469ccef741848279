//! # Sub-packet Demultiplexer
//!
//! Splits a validated packet payload into `[id][len][data]` sub-packets and
//! routes each one to the decoder for its id.

use bytes::Bytes;
use std::fmt;

use super::decoder::{decode_sensor, SensorData};
use super::packet::{SubPacket, SubPacketKind, ValidatedPacket, SUB_PACKET_HEADER_SIZE};

/// The unparseable end of a packet payload.
///
/// Produced when a sub-packet header is cut off or declares more data than
/// the payload has left. Everything from that header onward is discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncatedTail {
    /// Id of the sub-packet that overran
    pub id: u8,

    /// Declared length, if the length byte was present
    pub declared: Option<u8>,

    /// Data bytes actually left after the sub-packet header
    pub available: usize,

    /// The discarded bytes
    pub bytes: Bytes,
}

impl fmt::Display for TruncatedTail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.declared {
            Some(declared) => write!(
                f,
                "sub-packet 0x{:02X} declares {} bytes but only {} remain",
                self.id, declared, self.available
            ),
            None => write!(f, "sub-packet 0x{:02X} header is cut off", self.id),
        }
    }
}

/// Iterator over the sub-packets of one packet, in transmission order
#[derive(Debug)]
pub struct SubPackets {
    payload: Bytes,
    offset: usize,
    finished: bool,
}

impl Iterator for SubPackets {
    type Item = Result<SubPacket, TruncatedTail>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.offset >= self.payload.len() {
            return None;
        }

        let start = self.offset;
        let remaining = self.payload.len() - start;
        let id = self.payload[start];

        if remaining < SUB_PACKET_HEADER_SIZE {
            self.finished = true;
            return Some(Err(TruncatedTail {
                id,
                declared: None,
                available: 0,
                bytes: self.payload.slice(start..),
            }));
        }

        let declared = self.payload[start + 1];
        let data_start = start + SUB_PACKET_HEADER_SIZE;
        let data_end = data_start + declared as usize;

        if data_end > self.payload.len() {
            self.finished = true;
            return Some(Err(TruncatedTail {
                id,
                declared: Some(declared),
                available: self.payload.len() - data_start,
                bytes: self.payload.slice(start..),
            }));
        }

        self.offset = data_end;
        Some(Ok(SubPacket {
            id,
            data: self.payload.slice(data_start..data_end),
        }))
    }
}

/// Split a validated packet into its sub-packets
///
/// Takes the packet by value: each packet is demultiplexed exactly once.
pub fn demux(packet: ValidatedPacket) -> SubPackets {
    SubPackets {
        payload: packet.payload(),
        offset: 0,
        finished: false,
    }
}

/// Routing outcome for one sub-packet
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Decoded by the decoder registered for its id
    Decoded(SensorData),

    /// No decoder for this id in this build
    Unknown(u8),

    /// Known id, but the data does not match the decoder's layout
    Malformed { kind: SubPacketKind, reason: String },
}

/// Route a sub-packet to the decoder keyed by its id
pub fn dispatch(sub: &SubPacket) -> Dispatch {
    let Some(kind) = sub.kind() else {
        return Dispatch::Unknown(sub.id);
    };

    match decode_sensor(kind, &sub.data) {
        Ok(data) => Dispatch::Decoded(data),
        Err(e) => Dispatch::Malformed {
            kind,
            reason: e.to_string(),
        },
    }
}
