//! Wire framing: `55 AA | SEQ | LEN | PAYLOAD[LEN] | CRC_LO CRC_HI | AA 55`.
//!
//! [`FrameCodec`] implements `tokio_util::codec::{Decoder, Encoder}` so a
//! role can drive it through `tokio_util::codec::Framed` over the serial
//! link, the same way the driver wraps its BM13xx frame codec. The decode
//! side also exposes [`FrameCodec::try_extract_one`] directly, since the
//! resync algorithm needs to run several times against one buffer without
//! waiting on fresh I/O.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_DEFRAME_BUFFER;
use crate::crc::crc16;
use crate::error::LinkError;
use crate::tracing::prelude::*;

const SYNC_START: [u8; 2] = [0x55, 0xAA];
const SYNC_END: [u8; 2] = [0xAA, 0x55];

pub const EOT_SEQ: u8 = 0xFF;
pub const EOT_PAYLOAD: &[u8] = b"EOT";

/// A logical `(seq, payload)` pair, framed on the wire and unwrapped by the deframer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(seq: u8, payload: Vec<u8>) -> Self {
        Self { seq, payload }
    }

    pub fn eot() -> Self {
        Self {
            seq: EOT_SEQ,
            payload: EOT_PAYLOAD.to_vec(),
        }
    }

    pub fn is_eot(&self) -> bool {
        self.seq == EOT_SEQ && self.payload == EOT_PAYLOAD
    }
}

/// Result of one resync/parse attempt against the rolling buffer.
#[derive(Debug, PartialEq, Eq)]
enum DecodeOutcome {
    Frame(Packet),
    Corrupt,
    Incomplete,
}

/// Encodes and decodes the wire format, including byte-level resync.
///
/// The deframer holds no state beyond its own corruption counters; the
/// rolling buffer itself belongs to whatever `BytesMut` the caller (or
/// `tokio_util::codec::Framed`) passes in.
#[derive(Debug, Default)]
pub struct FrameCodec {
    corrupt_count: u64,
    dropped_bytes: u64,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames rejected for bad length or CRC since creation.
    pub fn corrupt_count(&self) -> u64 {
        self.corrupt_count
    }

    /// Bytes discarded while resynchronising (noise before a sync, or overflow drops).
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    /// Runs the §4.1 resync algorithm once against `src`.
    ///
    /// Consumes leading noise before a discovered `sync_start` immediately
    /// (that prefix can never be part of any valid frame). On rejection it
    /// slips exactly one byte past the rejected `sync_start` so a real frame
    /// whose sync happens to sit inside the corrupted window is still
    /// discoverable on the next call.
    fn try_extract_one(&mut self, src: &mut BytesMut) -> DecodeOutcome {
        let Some(start) = find(src, &SYNC_START) else {
            self.enforce_cap(src);
            if src.len() > 1 {
                let keep_from = src.len() - 1;
                self.dropped_bytes += keep_from as u64;
                src.advance(keep_from);
            }
            return DecodeOutcome::Incomplete;
        };

        if start > 0 {
            self.dropped_bytes += start as u64;
            src.advance(start);
        }

        let Some(end) = find_from(src, &SYNC_END, 2) else {
            self.enforce_cap(src);
            return DecodeOutcome::Incomplete;
        };

        let inner = &src[2..end];
        if inner.len() < 4 || inner.len() != 2 + inner[1] as usize + 2 {
            src.advance(1);
            self.corrupt_count += 1;
            return DecodeOutcome::Corrupt;
        }

        let len = inner[1] as usize;
        let body = &inner[0..2 + len];
        let expected_crc = u16::from_le_bytes([inner[2 + len], inner[2 + len + 1]]);
        if crc16(body) != expected_crc {
            src.advance(1);
            self.corrupt_count += 1;
            return DecodeOutcome::Corrupt;
        }

        let seq = inner[0];
        let payload = inner[2..2 + len].to_vec();
        let total = end + 2;
        src.advance(total);
        DecodeOutcome::Frame(Packet::new(seq, payload))
    }

    /// Drops the oldest half of an over-long buffer that never yielded a frame.
    fn enforce_cap(&mut self, src: &mut BytesMut) {
        if src.len() > MAX_DEFRAME_BUFFER {
            let drop = src.len() / 2;
            self.dropped_bytes += drop as u64;
            self.corrupt_count += 1;
            warn!(
                dropped = drop,
                remaining = src.len() - drop,
                "deframer buffer overflow, dropping oldest half"
            );
            src.advance(drop);
        }
    }
}

fn find(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    find_from(haystack, needle, 0)
}

fn find_from(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < from + 2 {
        return None;
    }
    (from..=haystack.len() - 2).find(|&i| haystack[i] == needle[0] && haystack[i + 1] == needle[1])
}

impl Decoder for FrameCodec {
    type Item = Packet;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.try_extract_one(src) {
                DecodeOutcome::Frame(packet) => return Ok(Some(packet)),
                DecodeOutcome::Corrupt => continue,
                DecodeOutcome::Incomplete => return Ok(None),
            }
        }
    }
}

impl Encoder<Packet> for FrameCodec {
    type Error = LinkError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if packet.payload.len() > 255 {
            return Err(LinkError::FrameTooLarge {
                len: packet.payload.len(),
                max: 255,
            });
        }

        let mut body = Vec::with_capacity(2 + packet.payload.len());
        body.push(packet.seq);
        body.push(packet.payload.len() as u8);
        body.extend_from_slice(&packet.payload);
        let crc = crc16(&body);

        dst.reserve(SYNC_START.len() + body.len() + 2 + SYNC_END.len());
        dst.put_slice(&SYNC_START);
        dst.put_slice(&body);
        dst.put_slice(&crc.to_le_bytes());
        dst.put_slice(&SYNC_END);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn encode(packet: Packet) -> BytesMut {
        let mut codec = FrameCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(packet, &mut dst).unwrap();
        dst
    }

    #[test_case(0, &[]; "empty payload")]
    #[test_case(0, &[0u8; 255]; "max payload")]
    #[test_case(255, b"EOT"; "eot frame")]
    #[test_case(128, b"hello"; "typical short payload")]
    fn round_trips(seq: u8, payload: &[u8]) {
        let original = Packet::new(seq, payload.to_vec());
        let mut buf = encode(original.clone());
        let consumed_len = buf.len();

        let mut codec = FrameCodec::new();
        let decoded = codec.decode(&mut buf).unwrap().expect("frame decoded");
        assert_eq!(decoded, original);
        assert_eq!(consumed_len, 8 + payload.len());
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_oversized_payload_on_encode() {
        let packet = Packet::new(0, vec![0u8; 256]);
        let mut codec = FrameCodec::new();
        let mut dst = BytesMut::new();
        assert!(matches!(
            codec.encode(packet, &mut dst),
            Err(LinkError::FrameTooLarge { len: 256, max: 255 })
        ));
    }

    #[test]
    fn resync_skips_noise_before_a_valid_frame() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        buf.extend_from_slice(&encode(Packet::new(0, b"hi".to_vec())));

        let mut codec = FrameCodec::new();
        let decoded = codec.decode(&mut buf).unwrap().expect("frame decoded");
        assert_eq!(decoded, Packet::new(0, b"hi".to_vec()));
        assert_eq!(codec.dropped_bytes(), 4);
        assert_eq!(codec.corrupt_count(), 0);
    }

    #[test]
    fn corrupt_frame_then_valid_frame() {
        let mut bad = encode(Packet::new(0, b"hi".to_vec()));
        let crc_offset = bad.len() - 4;
        bad[crc_offset] ^= 0xFF;

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&bad);
        buf.extend_from_slice(&encode(Packet::new(0, b"XX".to_vec())));

        let mut codec = FrameCodec::new();
        let decoded = codec.decode(&mut buf).unwrap().expect("frame decoded");
        assert_eq!(decoded, Packet::new(0, b"XX".to_vec()));
        assert_eq!(codec.corrupt_count(), 1);
    }

    #[test]
    fn flipping_any_payload_bit_is_rejected() {
        let original = encode(Packet::new(5, b"hello".to_vec()));
        for i in 2..original.len() - 2 {
            let mut mutated = original.clone();
            mutated[i] ^= 0x01;

            let mut codec = FrameCodec::new();
            let result = codec.decode(&mut mutated).unwrap();
            assert!(result.is_none(), "byte {i} flip should not decode");
        }
    }

    #[test]
    fn incomplete_frame_waits_for_more_data() {
        let full = encode(Packet::new(0, b"hello".to_vec()));
        let mut partial = BytesMut::new();
        partial.extend_from_slice(&full[..full.len() - 1]);

        let mut codec = FrameCodec::new();
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[full.len() - 1..]);
        let decoded = codec.decode(&mut partial).unwrap().expect("frame decoded");
        assert_eq!(decoded, Packet::new(0, b"hello".to_vec()));
    }

    #[test]
    fn overflow_without_a_frame_drops_the_oldest_half() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x55, 0xAA]);
        buf.extend_from_slice(&vec![0u8; MAX_DEFRAME_BUFFER]);

        let mut codec = FrameCodec::new();
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.len() < MAX_DEFRAME_BUFFER);
        assert_eq!(codec.corrupt_count(), 1);
    }

    #[test]
    fn eot_round_trips() {
        let eot = Packet::eot();
        let mut buf = encode(eot.clone());
        let mut codec = FrameCodec::new();
        let decoded = codec.decode(&mut buf).unwrap().expect("frame decoded");
        assert!(decoded.is_eot());
        assert_eq!(decoded, eot);
    }
}
