//! # Packet Framer
//!
//! Reassembles validated packets from an arbitrary chunking of the serial
//! byte stream.
//!
//! The framer keeps a persistent buffer across [`PacketFramer::feed`] calls.
//! Once a header is found the length byte is trusted; if the checksum then
//! fails, the frame is reported as invalid and scanning resumes right after
//! the rejected header, so a header lookalike inside a payload costs at most
//! one false start.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use super::checksum::{xor_checksum, ChecksumFn};
use super::packet::{ValidatedPacket, HEADER, LENGTH_OFFSET, MAX_PAYLOAD_SIZE};

/// Framing parameters
#[derive(Debug, Clone, Copy)]
pub struct FramerConfig {
    /// Two fixed header bytes
    pub header: [u8; 2],

    /// Offset of the one-byte payload length field
    pub length_offset: usize,

    /// Checksum over `[length_offset..=checksum]`; zero means valid
    pub checksum: ChecksumFn,

    /// Length values above this are rejected without waiting for the body
    pub max_payload: usize,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            header: HEADER,
            length_offset: LENGTH_OFFSET,
            checksum: xor_checksum,
            max_payload: MAX_PAYLOAD_SIZE,
        }
    }
}

/// One framing outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framed {
    /// A frame that passed the checksum
    Packet(ValidatedPacket),

    /// Bytes of a frame that failed validation
    Invalid(Bytes),
}

/// Stateful byte-stream framer
#[derive(Debug)]
pub struct PacketFramer {
    config: FramerConfig,
    buffer: BytesMut,
}

impl PacketFramer {
    pub fn new(config: FramerConfig) -> Self {
        Self {
            config,
            buffer: BytesMut::with_capacity(2 * (config.length_offset + config.max_payload + 2)),
        }
    }

    /// Append bytes and iterate the frames they complete
    ///
    /// The returned iterator is lazy. Frames it does not get to yield stay
    /// buffered and come out of the next `feed` or [`frames`](Self::frames)
    /// call.
    ///
    /// # Examples
    ///
    /// ```
    /// use kobuki_driver::protocol::encoder::encode_frame;
    /// use kobuki_driver::protocol::framer::{Framed, FramerConfig, PacketFramer};
    ///
    /// let frame = encode_frame(&[0x06, 0x02, 0x10, 0x12]).unwrap();
    /// let mut framer = PacketFramer::new(FramerConfig::default());
    ///
    /// assert_eq!(framer.feed(&frame[..3]).count(), 0);
    /// let rest: Vec<Framed> = framer.feed(&frame[3..]).collect();
    /// assert!(matches!(rest.as_slice(), [Framed::Packet(_)]));
    /// ```
    pub fn feed(&mut self, bytes: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(bytes);
        Frames { framer: self }
    }

    /// Iterate frames already buffered, without adding bytes
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { framer: self }
    }

    /// Bytes currently held waiting for completion
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop all buffered bytes
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn next_frame(&mut self) -> Option<Framed> {
        let header = self.config.header;

        match self.buffer.windows(header.len()).position(|w| w == header) {
            Some(0) => {}
            Some(skip) => {
                trace!("Skipping {} bytes before header", skip);
                self.buffer.advance(skip);
            }
            None => {
                // A trailing first header byte may pair with the next chunk
                let keep = usize::from(self.buffer.last() == Some(&header[0]));
                let skip = self.buffer.len() - keep;
                if skip > 0 {
                    trace!("No header in {} bytes, dropping them", skip);
                    self.buffer.advance(skip);
                }
                return None;
            }
        }

        let length_offset = self.config.length_offset;
        if self.buffer.len() <= length_offset {
            return None;
        }

        let payload_len = self.buffer[length_offset] as usize;
        if payload_len > self.config.max_payload {
            debug!("Length {} exceeds maximum {}, resyncing", payload_len, self.config.max_payload);
            let rejected = Bytes::copy_from_slice(&self.buffer[..=length_offset]);
            self.buffer.advance(header.len());
            return Some(Framed::Invalid(rejected));
        }

        let total = length_offset + 1 + payload_len + 1;
        if self.buffer.len() < total {
            return None;
        }

        if (self.config.checksum)(&self.buffer[length_offset..total]) == 0 {
            let bytes = self.buffer.split_to(total).freeze();
            return Some(Framed::Packet(ValidatedPacket::new(bytes, length_offset)));
        }

        debug!("Checksum mismatch on {}-byte frame, resyncing", total);
        let rejected = Bytes::copy_from_slice(&self.buffer[..total]);
        self.buffer.advance(header.len());
        Some(Framed::Invalid(rejected))
    }
}

/// Lazy iterator over the frames in a [`PacketFramer`]'s buffer
#[derive(Debug)]
pub struct Frames<'a> {
    framer: &'a mut PacketFramer,
}

impl Iterator for Frames<'_> {
    type Item = Framed;

    fn next(&mut self) -> Option<Framed> {
        self.framer.next_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encoder::encode_frame;

    fn framer() -> PacketFramer {
        PacketFramer::new(FramerConfig::default())
    }

    fn sample_frame() -> Bytes {
        // Core sensors sub-packet with encoder ticks 100/100
        let mut payload = vec![0x01, 0x0F];
        payload.extend_from_slice(&[
            0x10, 0x00, // timestamp
            0x00, 0x00, 0x00, // bumper, wheel drop, cliff
            0x64, 0x00, // left encoder
            0x64, 0x00, // right encoder
            0x00, 0x00, // pwm
            0x00, 0x00, 0xA0, 0x00, // buttons, charger, battery, overcurrent
        ]);
        encode_frame(&payload).unwrap()
    }

    fn packets(framed: Vec<Framed>) -> Vec<ValidatedPacket> {
        framed
            .into_iter()
            .filter_map(|f| match f {
                Framed::Packet(p) => Some(p),
                Framed::Invalid(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_whole_packet() {
        let frame = sample_frame();
        let mut framer = framer();
        let out: Vec<Framed> = framer.feed(&frame).collect();

        assert_eq!(out.len(), 1);
        match &out[0] {
            Framed::Packet(packet) => assert_eq!(packet.as_bytes(), &frame),
            other => panic!("expected packet, got {:?}", other),
        }
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_split_at_every_point() {
        let frame = sample_frame();
        let whole = packets(framer().feed(&frame).collect());

        for split in 0..=frame.len() {
            let mut framer = framer();
            let mut out: Vec<Framed> = framer.feed(&frame[..split]).collect();
            out.extend(framer.feed(&frame[split..]));
            assert_eq!(packets(out), whole, "split at {}", split);
        }
    }

    #[test]
    fn test_byte_by_byte() {
        let frame = sample_frame();
        let mut framer = framer();
        let mut out = Vec::new();
        for byte in frame.iter() {
            out.extend(framer.feed(&[*byte]));
        }
        assert_eq!(packets(out).len(), 1);
    }

    #[test]
    fn test_corrupted_payload_byte_is_rejected() {
        let frame = sample_frame();

        // Every byte from the length field through the checksum is covered
        for i in LENGTH_OFFSET..frame.len() {
            let mut corrupted = frame.to_vec();
            corrupted[i] ^= 0x5A;

            let out: Vec<Framed> = framer().feed(&corrupted).collect();
            assert!(packets(out).is_empty(), "corruption at {} was accepted", i);
        }
    }

    #[test]
    fn test_checksum_failure_signals_invalid() {
        let frame = sample_frame();
        let mut corrupted = frame.to_vec();
        corrupted[6] ^= 0x01;

        let out: Vec<Framed> = framer().feed(&corrupted).collect();
        assert_eq!(out.first(), Some(&Framed::Invalid(Bytes::from(corrupted.clone()))));
    }

    #[test]
    fn test_resync_after_corrupted_frame() {
        let frame = sample_frame();
        let mut stream = frame.to_vec();
        stream[8] ^= 0xFF;
        stream.extend_from_slice(&frame);

        let out: Vec<Framed> = framer().feed(&stream).collect();
        assert!(matches!(out[0], Framed::Invalid(_)));
        assert_eq!(packets(out).len(), 1);
    }

    #[test]
    fn test_false_header_inside_truncated_frame() {
        // A header lookalike whose length runs past a real frame start
        let frame = sample_frame();
        let mut stream = vec![0xAA, 0x55, 0x03, 0x01];
        stream.extend_from_slice(&frame);
        stream.extend_from_slice(&frame);

        let out: Vec<Framed> = framer().feed(&stream).collect();
        let good = packets(out);
        assert!(!good.is_empty());
        assert!(good.iter().all(|p| p.as_bytes() == &frame));
    }

    #[test]
    fn test_garbage_before_header() {
        let frame = sample_frame();
        let mut stream = vec![0x00, 0x13, 0xAA, 0x42, 0x55];
        stream.extend_from_slice(&frame);

        let out: Vec<Framed> = framer().feed(&stream).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(packets(out).len(), 1);
    }

    #[test]
    fn test_non_header_bytes_do_not_accumulate() {
        let mut framer = framer();
        assert_eq!(framer.feed(&[0x01, 0x02, 0x03]).count(), 0);
        assert_eq!(framer.buffered_len(), 0);

        for _ in 0..1000 {
            assert_eq!(framer.feed(&[0x10, 0x20, 0x30]).count(), 0);
        }
        assert!(framer.buffered_len() <= 1);
    }

    #[test]
    fn test_trailing_header_byte_is_kept() {
        let frame = sample_frame();
        let mut framer = framer();
        assert_eq!(framer.feed(&[0x01, 0x02, 0xAA]).count(), 0);
        assert_eq!(framer.buffered_len(), 1);

        let out: Vec<Framed> = framer.feed(&frame[1..]).collect();
        assert_eq!(packets(out).len(), 1);
    }

    #[test]
    fn test_multiple_packets_in_one_feed() {
        let frame = sample_frame();
        let mut stream = Vec::new();
        for _ in 0..3 {
            stream.extend_from_slice(&frame);
        }
        let out: Vec<Framed> = framer().feed(&stream).collect();
        assert_eq!(packets(out).len(), 3);
    }

    #[test]
    fn test_sequence_is_restartable() {
        let frame = sample_frame();
        let mut stream = frame.to_vec();
        stream.extend_from_slice(&frame);

        let mut framer = framer();
        let first = framer.feed(&stream).next();
        assert!(matches!(first, Some(Framed::Packet(_))));
        assert_eq!(framer.buffered_len(), frame.len());

        let rest: Vec<Framed> = framer.frames().collect();
        assert_eq!(packets(rest).len(), 1);
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let config = FramerConfig {
            max_payload: 16,
            ..FramerConfig::default()
        };
        let mut framer = PacketFramer::new(config);
        let out: Vec<Framed> = framer.feed(&[0xAA, 0x55, 0x40, 0x00]).collect();
        assert!(matches!(out.as_slice(), [Framed::Invalid(_)]));
    }

    #[test]
    fn test_injected_checksum_policy() {
        fn always_valid(_: &[u8]) -> u8 {
            0
        }
        let config = FramerConfig {
            checksum: always_valid,
            ..FramerConfig::default()
        };
        let mut framer = PacketFramer::new(config);
        let out: Vec<Framed> = framer.feed(&[0xAA, 0x55, 0x01, 0x07, 0xEE]).collect();
        assert_eq!(packets(out).len(), 1);
    }

    #[test]
    fn test_reset_clears_partial_frame() {
        let frame = sample_frame();
        let mut framer = framer();
        assert_eq!(framer.feed(&frame[..5]).count(), 0);
        framer.reset();
        assert_eq!(framer.buffered_len(), 0);
        assert_eq!(framer.feed(&frame[5..]).count(), 0);
    }
}
