//! `tokio_util` framing for the media stream.
//!
//! [`MediaCodec`] turns a TCP byte stream into [`Packet`]s on the receiving
//! side and serializes packets on the sending side. An unrecognized type
//! tag surfaces as [`TeleportError::UnknownTag`], which ends the stream.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TeleportError;
use crate::header::FrameHeader;
use crate::packet::{MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, Packet};

#[derive(Debug, Default, Clone, Copy)]
pub struct MediaCodec {}

impl MediaCodec {
    pub fn new() -> Self {
        Self {}
    }
}

impl Decoder for MediaCodec {
    type Item = Packet;
    type Error = TeleportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FrameHeader::SIZE {
            return Ok(None);
        }

        let header = FrameHeader::decode(&src[..FrameHeader::SIZE])?;
        if header.payload_len() > MAX_PAYLOAD_SIZE {
            return Err(TeleportError::PayloadTooLarge {
                size: header.payload_len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let total = FrameHeader::SIZE + header.kind.sub_header_size() + header.payload_len();
        debug_assert!(total <= MAX_FRAME_SIZE);
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total).freeze();
        Packet::from_bytes(frame).map(Some)
    }
}

impl Encoder<Packet> for MediaCodec {
    type Error = TeleportError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst)
    }
}

/// Pre-serialized frames, as produced once by the encode pipeline and
/// shared between every connection.
impl Encoder<Bytes> for MediaCodec {
    type Error = TeleportError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.remaining());
        dst.extend_from_slice(&item);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
