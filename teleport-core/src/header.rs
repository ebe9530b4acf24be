//! Fixed-layout wire headers.
//!
//! All integers and floats are little-endian.
//!
//! ```text
//! FrameHeader   (16 bytes):  tag [u8; 4] | timestamp u64 | size i32
//! ImageHeader   (88 bytes):  color_matrix [f32; 16] | range_min [f32; 3] | range_max [f32; 3]
//! WaveHeader    (16 bytes):  sample_format i32 | sample_rate i32 | channels i32 | frames i32
//! OptionsHeader  (8 bytes):  magic "OPTS" | size i32
//! ```
//!
//! A `JPEG` frame header is followed by an [`ImageHeader`], a `WAVE` frame
//! header by a [`WaveHeader`], and a keep-alive (`ANJA`) by nothing. The
//! payload of `size` bytes comes last.

use crate::error::TeleportError;

// ── Tags ─────────────────────────────────────────────────────────

/// Type tag of a compressed image packet.
pub const TAG_IMAGE: [u8; 4] = *b"JPEG";
/// Type tag of a raw interleaved audio packet.
pub const TAG_AUDIO: [u8; 4] = *b"WAVE";
/// Reserved keep-alive tag; carries no sub-header.
pub const TAG_KEEP_ALIVE: [u8; 4] = *b"ANJA";
/// Magic opening the options handshake.
pub const OPTIONS_MAGIC: [u8; 4] = *b"OPTS";

// ── PacketKind ───────────────────────────────────────────────────

/// Distinguishes the media carried by a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Image,
    Audio,
    KeepAlive,
}

impl PacketKind {
    /// The 4-byte tag used on the wire.
    pub const fn tag(self) -> [u8; 4] {
        match self {
            PacketKind::Image => TAG_IMAGE,
            PacketKind::Audio => TAG_AUDIO,
            PacketKind::KeepAlive => TAG_KEEP_ALIVE,
        }
    }

    /// Size of the sub-header that follows a [`FrameHeader`] of this kind.
    pub const fn sub_header_size(self) -> usize {
        match self {
            PacketKind::Image => ImageHeader::SIZE,
            PacketKind::Audio => WaveHeader::SIZE,
            PacketKind::KeepAlive => 0,
        }
    }
}

impl TryFrom<[u8; 4]> for PacketKind {
    type Error = TeleportError;

    fn try_from(tag: [u8; 4]) -> Result<Self, Self::Error> {
        match &tag {
            b"JPEG" => Ok(PacketKind::Image),
            b"WAVE" => Ok(PacketKind::Audio),
            b"ANJA" => Ok(PacketKind::KeepAlive),
            _ => Err(TeleportError::UnknownTag(tag)),
        }
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketKind::Image => write!(f, "image"),
            PacketKind::Audio => write!(f, "audio"),
            PacketKind::KeepAlive => write!(f, "keep-alive"),
        }
    }
}

// ── FrameHeader ──────────────────────────────────────────────────

/// Common header opening every media frame on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: PacketKind,
    pub timestamp: u64,
    pub size: i32,
}

impl FrameHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 16;

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.kind.tag());
        buf[4..12].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[12..16].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Deserialize from bytes.
    ///
    /// Fails with [`TeleportError::UnknownTag`] when the tag is not one of
    /// `JPEG`, `WAVE` or `ANJA`, and with `InvalidHeader` on a negative size.
    pub fn decode(data: &[u8]) -> Result<Self, TeleportError> {
        if data.len() < Self::SIZE {
            return Err(TeleportError::InvalidHeader("frame header too short"));
        }
        let kind = PacketKind::try_from(read_array::<4>(data, 0))?;
        let header = Self {
            kind,
            timestamp: u64::from_le_bytes(read_array(data, 4)),
            size: i32::from_le_bytes(read_array(data, 12)),
        };
        if header.size < 0 {
            return Err(TeleportError::InvalidHeader("negative payload size"));
        }
        Ok(header)
    }

    /// Payload length as `usize`; never negative after [`decode`](Self::decode).
    pub fn payload_len(&self) -> usize {
        self.size.max(0) as usize
    }
}

// ── ImageHeader ──────────────────────────────────────────────────

/// Color reconstruction data sent with every image packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageHeader {
    pub color_matrix: [f32; 16],
    pub range_min: [f32; 3],
    pub range_max: [f32; 3],
}

impl Default for ImageHeader {
    /// Identity matrix, full range.
    fn default() -> Self {
        let mut color_matrix = [0.0; 16];
        for i in 0..4 {
            color_matrix[i * 5] = 1.0;
        }
        Self {
            color_matrix,
            range_min: [0.0; 3],
            range_max: [1.0; 3],
        }
    }
}

impl ImageHeader {
    /// Encoded size on the wire: 22 floats.
    pub const SIZE: usize = 22 * 4;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let floats = self
            .color_matrix
            .iter()
            .chain(self.range_min.iter())
            .chain(self.range_max.iter());
        for (i, f) in floats.enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&f.to_le_bytes());
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, TeleportError> {
        if data.len() < Self::SIZE {
            return Err(TeleportError::InvalidHeader("image header too short"));
        }
        let float = |i: usize| f32::from_le_bytes(read_array(data, i * 4));

        let mut header = Self {
            color_matrix: [0.0; 16],
            range_min: [0.0; 3],
            range_max: [0.0; 3],
        };
        for (i, v) in header.color_matrix.iter_mut().enumerate() {
            *v = float(i);
        }
        for i in 0..3 {
            header.range_min[i] = float(16 + i);
            header.range_max[i] = float(19 + i);
        }
        Ok(header)
    }
}

// ── WaveHeader ───────────────────────────────────────────────────

/// Audio block parameters sent with every audio packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaveHeader {
    /// Sample format code, see [`crate::media::SampleFormat`].
    pub sample_format: i32,
    pub sample_rate: i32,
    pub channels: i32,
    /// Number of sample frames (one sample per channel) in the payload.
    pub frames: i32,
}

impl WaveHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 16;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.sample_format.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sample_rate.to_le_bytes());
        buf[8..12].copy_from_slice(&self.channels.to_le_bytes());
        buf[12..16].copy_from_slice(&self.frames.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, TeleportError> {
        if data.len() < Self::SIZE {
            return Err(TeleportError::InvalidHeader("wave header too short"));
        }
        Ok(Self {
            sample_format: i32::from_le_bytes(read_array(data, 0)),
            sample_rate: i32::from_le_bytes(read_array(data, 4)),
            channels: i32::from_le_bytes(read_array(data, 8)),
            frames: i32::from_le_bytes(read_array(data, 12)),
        })
    }
}

// ── OptionsHeader ────────────────────────────────────────────────

/// Prefix of the consumer's options handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionsHeader {
    pub size: i32,
}

impl OptionsHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&OPTIONS_MAGIC);
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, TeleportError> {
        if data.len() < Self::SIZE {
            return Err(TeleportError::InvalidHeader("options header too short"));
        }
        let magic = read_array::<4>(data, 0);
        if magic != OPTIONS_MAGIC {
            return Err(TeleportError::InvalidMagic(magic));
        }
        let size = i32::from_le_bytes(read_array(data, 4));
        if size < 0 {
            return Err(TeleportError::InvalidHeader("negative options size"));
        }
        Ok(Self { size })
    }
}

/// Copy `N` bytes starting at `offset`. Callers check the length first.
fn read_array<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[offset..offset + N]);
    out
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_layout() {
        let hdr = FrameHeader {
            kind: PacketKind::Audio,
            timestamp: 0x0102_0304_0506_0708,
            size: 4096,
        };
        let bytes = hdr.encode();
        assert_eq!(&bytes[0..4], b"WAVE");
        assert_eq!(bytes[4], 0x08);
        assert_eq!(bytes[11], 0x01);
        assert_eq!(&bytes[12..16], &4096i32.to_le_bytes());
        assert_eq!(FrameHeader::decode(&bytes).unwrap(), hdr);
    }

    #[test]
    fn frame_header_boundary_timestamps() {
        for ts in [0u64, u64::MAX] {
            let hdr = FrameHeader {
                kind: PacketKind::Image,
                timestamp: ts,
                size: 0,
            };
            assert_eq!(FrameHeader::decode(&hdr.encode()).unwrap().timestamp, ts);
        }
    }

    #[test]
    fn unknown_tag_rejected() {
        let mut bytes = FrameHeader {
            kind: PacketKind::Image,
            timestamp: 1,
            size: 1,
        }
        .encode();
        bytes[0..4].copy_from_slice(b"PNG ");
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(TeleportError::UnknownTag(tag)) if &tag == b"PNG "
        ));
    }

    #[test]
    fn negative_size_rejected() {
        let mut bytes = FrameHeader {
            kind: PacketKind::Image,
            timestamp: 1,
            size: 0,
        }
        .encode();
        bytes[12..16].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(FrameHeader::decode(&bytes).is_err());
    }

    #[test]
    fn image_header_is_22_floats() {
        assert_eq!(ImageHeader::SIZE, 88);
        let mut hdr = ImageHeader::default();
        hdr.color_matrix[3] = -0.5;
        hdr.range_min = [16.0 / 255.0; 3];
        hdr.range_max = [235.0 / 255.0, 240.0 / 255.0, 240.0 / 255.0];
        let decoded = ImageHeader::decode(&hdr.encode()).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn wave_header_fields() {
        let hdr = WaveHeader {
            sample_format: 2,
            sample_rate: 48_000,
            channels: 2,
            frames: 1024,
        };
        assert_eq!(WaveHeader::decode(&hdr.encode()).unwrap(), hdr);
        assert!(WaveHeader::decode(&[0u8; 8]).is_err());
    }

    #[test]
    fn options_header_checks_magic() {
        let hdr = OptionsHeader { size: 14 };
        let mut bytes = hdr.encode();
        assert_eq!(&bytes[0..4], b"OPTS");
        assert_eq!(OptionsHeader::decode(&bytes).unwrap(), hdr);

        bytes[0] = b'X';
        assert!(matches!(
            OptionsHeader::decode(&bytes),
            Err(TeleportError::InvalidMagic(_))
        ));
    }
}
