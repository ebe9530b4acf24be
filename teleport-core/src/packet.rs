//! In-memory representation of one unit of media on the wire.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::TeleportError;
use crate::header::{FrameHeader, ImageHeader, PacketKind, WaveHeader};

/// Upper bound for a single packet payload (64 MiB).
///
/// A 4K I444 frame is ~25 MB raw, so compressed payloads stay well below.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Upper bound for one complete frame on the wire.
pub const MAX_FRAME_SIZE: usize = FrameHeader::SIZE + ImageHeader::SIZE + MAX_PAYLOAD_SIZE;

// ── MediaHeader ──────────────────────────────────────────────────

/// Type-specific sub-header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaHeader {
    Image(ImageHeader),
    Audio(WaveHeader),
    KeepAlive,
}

impl MediaHeader {
    pub fn kind(&self) -> PacketKind {
        match self {
            MediaHeader::Image(_) => PacketKind::Image,
            MediaHeader::Audio(_) => PacketKind::Audio,
            MediaHeader::KeepAlive => PacketKind::KeepAlive,
        }
    }
}

// ── Packet ───────────────────────────────────────────────────────

/// One image or audio block as carried on the wire.
///
/// The payload is a reference-counted [`Bytes`] so the same buffer can be
/// fanned out to every connection without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    timestamp: u64,
    media: MediaHeader,
    payload: Bytes,
}

impl Packet {
    /// A compressed image packet.
    pub fn image(timestamp: u64, header: ImageHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            media: MediaHeader::Image(header),
            payload: payload.into(),
        }
    }

    /// A raw interleaved audio packet.
    pub fn audio(timestamp: u64, header: WaveHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            media: MediaHeader::Audio(header),
            payload: payload.into(),
        }
    }

    /// An empty keep-alive frame.
    pub fn keep_alive() -> Self {
        Self {
            timestamp: 0,
            media: MediaHeader::KeepAlive,
            payload: Bytes::new(),
        }
    }

    pub fn kind(&self) -> PacketKind {
        self.media.kind()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn media(&self) -> &MediaHeader {
        &self.media
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Total size of the serialized frame.
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.kind().sub_header_size() + self.payload.len()
    }

    /// Append the serialized frame to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) -> Result<(), TeleportError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TeleportError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let header = FrameHeader {
            kind: self.kind(),
            timestamp: self.timestamp,
            size: self.payload.len() as i32,
        };

        dst.reserve(self.encoded_len());
        dst.put_slice(&header.encode());
        match &self.media {
            MediaHeader::Image(h) => dst.put_slice(&h.encode()),
            MediaHeader::Audio(h) => dst.put_slice(&h.encode()),
            MediaHeader::KeepAlive => {}
        }
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Serialize into an immutable buffer ready for fan-out.
    pub fn to_bytes(&self) -> Result<Bytes, TeleportError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Parse exactly one complete frame.
    ///
    /// `bytes` must contain the header, sub-header and payload and nothing
    /// else.
    pub fn from_bytes(bytes: Bytes) -> Result<Self, TeleportError> {
        let header = FrameHeader::decode(&bytes)?;
        let sub = header.kind.sub_header_size();
        let expected = FrameHeader::SIZE + sub + header.payload_len();

        if header.payload_len() > MAX_PAYLOAD_SIZE {
            return Err(TeleportError::PayloadTooLarge {
                size: header.payload_len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if bytes.len() != expected {
            return Err(TeleportError::InvalidPayloadLength {
                expected,
                actual: bytes.len(),
            });
        }

        let sub_bytes = &bytes[FrameHeader::SIZE..FrameHeader::SIZE + sub];
        let media = match header.kind {
            PacketKind::Image => MediaHeader::Image(ImageHeader::decode(sub_bytes)?),
            PacketKind::Audio => MediaHeader::Audio(WaveHeader::decode(sub_bytes)?),
            PacketKind::KeepAlive => MediaHeader::KeepAlive,
        };

        Ok(Self {
            timestamp: header.timestamp,
            media,
            payload: bytes.slice(FrameHeader::SIZE + sub..),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image(ts: u64) -> Packet {
        let mut hdr = ImageHeader::default();
        hdr.color_matrix[12] = -0.0627;
        Packet::image(ts, hdr, vec![0xFF, 0xD8, 0x00, 0x11, 0xFF, 0xD9])
    }

    #[test]
    fn image_packet_roundtrip_boundaries() {
        for ts in [0, 1, u64::MAX] {
            let pkt = sample_image(ts);
            let bytes = pkt.to_bytes().unwrap();
            assert_eq!(bytes.len(), 16 + 88 + 6);
            let parsed = Packet::from_bytes(bytes).unwrap();
            assert_eq!(parsed, pkt);
            assert_eq!(parsed.timestamp(), ts);
        }
    }

    #[test]
    fn audio_packet_layout() {
        let wave = WaveHeader {
            sample_format: 2,
            sample_rate: 48_000,
            channels: 2,
            frames: 2,
        };
        let pkt = Packet::audio(77, wave, vec![1u8, 2, 3, 4, 5, 6, 7, 8]);
        let bytes = pkt.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"WAVE");
        assert_eq!(&bytes[12..16], &8i32.to_le_bytes());
        assert_eq!(&bytes[16 + 4..16 + 8], &48_000i32.to_le_bytes());
        assert_eq!(Packet::from_bytes(bytes).unwrap().media(), &MediaHeader::Audio(wave));
    }

    #[test]
    fn keep_alive_has_no_sub_header() {
        let bytes = Packet::keep_alive().to_bytes().unwrap();
        assert_eq!(bytes.len(), FrameHeader::SIZE);
        assert_eq!(&bytes[0..4], b"ANJA");
    }

    #[test]
    fn truncated_and_trailing_bytes_rejected() {
        let bytes = sample_image(5).to_bytes().unwrap();
        let short = bytes.slice(..bytes.len() - 1);
        assert!(matches!(
            Packet::from_bytes(short),
            Err(TeleportError::InvalidPayloadLength { .. })
        ));

        let mut long = BytesMut::from(&bytes[..]);
        long.put_u8(0);
        assert!(Packet::from_bytes(long.freeze()).is_err());
    }
}
