//! Batch verdicts sent in the reverse direction: `ACK`/`NAK`.
//!
//! Unlike data frames these are not sync-delimited; the leading byte alone
//! (`0x06` or `0x15`) identifies the message. [`ControlCodec`] still follows
//! the same `Decoder` shape as [`crate::frame::FrameCodec`]: unrecognised
//! leading bytes are noise and are slipped one at a time, matching the
//! driver's `CommandDecoder` convention for framing it can't yet parse.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::LinkError;

pub const ACK_TAG: u8 = 0x06;
pub const NAK_TAG: u8 = 0x15;

/// A batch verdict: acknowledgement or negative acknowledgement with a missing list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Ack { batch_start: u8, batch_end: u8 },
    Nak {
        batch_start: u8,
        batch_end: u8,
        missing: Vec<u8>,
    },
}

impl ControlMessage {
    pub fn ack(batch_start: u8, batch_end: u8) -> Self {
        Self::Ack {
            batch_start,
            batch_end,
        }
    }

    /// Builds a NAK, truncating `missing` to the 255 entries a single
    /// message can carry (spec §9's NAK-overflow open question: the
    /// remainder is reported on the batch's next verdict).
    pub fn nak(batch_start: u8, batch_end: u8, mut missing: Vec<u8>) -> Self {
        missing.truncate(255);
        Self::Nak {
            batch_start,
            batch_end,
            missing,
        }
    }

    pub fn batch_start(&self) -> u8 {
        match self {
            Self::Ack { batch_start, .. } | Self::Nak { batch_start, .. } => *batch_start,
        }
    }

    pub fn batch_end(&self) -> u8 {
        match self {
            Self::Ack { batch_end, .. } | Self::Nak { batch_end, .. } => *batch_end,
        }
    }

    /// Whether this verdict answers the outstanding `(batch_start, batch_end)`.
    ///
    /// A verdict for a different batch is ignored, not treated as failure.
    pub fn matches(&self, batch_start: u8, batch_end: u8) -> bool {
        self.batch_start() == batch_start && self.batch_end() == batch_end
    }
}

#[derive(Debug, Default)]
pub struct ControlCodec;

impl ControlCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ControlCodec {
    type Item = ControlMessage;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.is_empty() {
                return Ok(None);
            }

            match src[0] {
                ACK_TAG => {
                    if src.len() < 3 {
                        return Ok(None);
                    }
                    let batch_start = src[1];
                    let batch_end = src[2];
                    src.advance(3);
                    return Ok(Some(ControlMessage::ack(batch_start, batch_end)));
                }
                NAK_TAG => {
                    if src.len() < 4 {
                        return Ok(None);
                    }
                    let batch_start = src[1];
                    let batch_end = src[2];
                    let missing_count = src[3] as usize;
                    let total = 4 + missing_count;
                    if src.len() < total {
                        return Ok(None);
                    }
                    let missing = src[4..total].to_vec();
                    src.advance(total);
                    return Ok(Some(ControlMessage::Nak {
                        batch_start,
                        batch_end,
                        missing,
                    }));
                }
                _ => {
                    src.advance(1);
                    continue;
                }
            }
        }
    }
}

impl Encoder<ControlMessage> for ControlCodec {
    type Error = LinkError;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            ControlMessage::Ack {
                batch_start,
                batch_end,
            } => {
                dst.reserve(3);
                dst.put_u8(ACK_TAG);
                dst.put_u8(batch_start);
                dst.put_u8(batch_end);
            }
            ControlMessage::Nak {
                batch_start,
                batch_end,
                missing,
            } => {
                if missing.len() > 255 {
                    return Err(LinkError::FrameTooLarge {
                        len: missing.len(),
                        max: 255,
                    });
                }
                dst.reserve(4 + missing.len());
                dst.put_u8(NAK_TAG);
                dst.put_u8(batch_start);
                dst.put_u8(batch_end);
                dst.put_u8(missing.len() as u8);
                dst.put_slice(&missing);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(msg: ControlMessage) -> BytesMut {
        let mut codec = ControlCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(msg, &mut dst).unwrap();
        dst
    }

    #[test]
    fn ack_round_trips() {
        let msg = ControlMessage::ack(0, 99);
        let mut buf = encode(msg.clone());
        let mut codec = ControlCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(msg));
        assert!(buf.is_empty());
    }

    #[test]
    fn nak_round_trips_with_missing_list() {
        let msg = ControlMessage::nak(0, 99, vec![42]);
        let mut buf = encode(msg.clone());
        let mut codec = ControlCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(msg));
    }

    #[test]
    fn nak_truncates_missing_list_to_255() {
        let missing: Vec<u8> = (0..=255u16).map(|v| v as u8).collect();
        let msg = ControlMessage::nak(0, 99, missing);
        match &msg {
            ControlMessage::Nak { missing, .. } => assert_eq!(missing.len(), 255),
            _ => unreachable!(),
        }
    }

    #[test]
    fn skips_noise_before_a_control_message() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[0xFF, 0xFF]);
        buf.extend_from_slice(&encode(ControlMessage::ack(0, 9)));

        let mut codec = ControlCodec::new();
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(ControlMessage::ack(0, 9))
        );
    }

    #[test]
    fn mismatched_verdict_is_ignored_not_failed() {
        let verdict = ControlMessage::ack(5, 10);
        assert!(!verdict.matches(0, 99));
        assert!(verdict.matches(5, 10));
    }
}
