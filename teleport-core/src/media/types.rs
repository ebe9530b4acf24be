//! Frame types shared by the capture side, the pipelines and the host sink.
//!
//! These are in-memory representations. The wire form is
//! [`crate::packet::Packet`].

use bytes::Bytes;

use crate::error::{TeleportError, TransformError};
use crate::header::{ImageHeader, WaveHeader};

// ── PixelLayout ──────────────────────────────────────────────────

/// Planar layout of an [`Image`], including its chroma subsampling.
///
/// Host formats outside this set are converted by the host before
/// submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    /// Y plane + quarter-size Cb and Cr planes.
    I420,
    /// Y plane + half-width Cb and Cr planes.
    I422,
    /// Three full-size planes.
    I444,
    /// One packed plane, 4 bytes per pixel.
    Rgba,
}

impl PixelLayout {
    pub const fn code(self) -> u8 {
        match self {
            PixelLayout::I420 => 1,
            PixelLayout::I422 => 2,
            PixelLayout::I444 => 3,
            PixelLayout::Rgba => 4,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(PixelLayout::I420),
            2 => Some(PixelLayout::I422),
            3 => Some(PixelLayout::I444),
            4 => Some(PixelLayout::Rgba),
            _ => None,
        }
    }

    /// Byte length of each plane for a `width` x `height` image.
    pub fn plane_sizes(self, width: u32, height: u32) -> [usize; 3] {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        match self {
            PixelLayout::I420 => [w * h, cw * ch, cw * ch],
            PixelLayout::I422 => [w * h, cw * h, cw * h],
            PixelLayout::I444 => [w * h, w * h, w * h],
            PixelLayout::Rgba => [w * h * 4, 0, 0],
        }
    }

    /// Total byte length of all planes.
    pub fn buffer_len(self, width: u32, height: u32) -> usize {
        self.plane_sizes(width, height).iter().sum()
    }
}

// ── Image ────────────────────────────────────────────────────────

/// An uncompressed image with all planes stored back to back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    layout: PixelLayout,
    data: Vec<u8>,
}

impl Image {
    /// Wrap `data`, checking that it holds exactly the planes of `layout`.
    pub fn new(
        width: u32,
        height: u32,
        layout: PixelLayout,
        data: Vec<u8>,
    ) -> Result<Self, TransformError> {
        if width == 0 || height == 0 {
            return Err(TransformError::Unsupported(format!(
                "empty image {width}x{height}"
            )));
        }
        let expected = layout.buffer_len(width, height);
        if data.len() != expected {
            return Err(TransformError::Unsupported(format!(
                "{layout:?} {width}x{height} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            layout,
            data,
        })
    }

    /// Build an image by copying separate plane slices (as delivered by a
    /// capture host) into one buffer.
    pub fn from_planes(
        width: u32,
        height: u32,
        layout: PixelLayout,
        planes: &[&[u8]],
        mut buffer: Vec<u8>,
    ) -> Result<Self, TransformError> {
        let sizes = layout.plane_sizes(width, height);
        buffer.clear();
        buffer.reserve(layout.buffer_len(width, height));
        for (i, &size) in sizes.iter().enumerate().filter(|(_, s)| **s > 0) {
            let plane = planes
                .get(i)
                .filter(|p| p.len() >= size)
                .ok_or_else(|| TransformError::Unsupported(format!("plane {i} too short")))?;
            buffer.extend_from_slice(&plane[..size]);
        }
        Self::new(width, height, layout, buffer)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The individual planes (one for `Rgba`, three otherwise).
    pub fn planes(&self) -> Vec<&[u8]> {
        let mut out = Vec::with_capacity(3);
        let mut offset = 0;
        for size in self.layout.plane_sizes(self.width, self.height) {
            if size > 0 {
                out.push(&self.data[offset..offset + size]);
                offset += size;
            }
        }
        out
    }

    /// Give the backing buffer back (e.g. to a [`super::BufferPool`]).
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

// ── VideoFrame ───────────────────────────────────────────────────

/// An image plus the color data needed to display it.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub timestamp: u64,
    pub image: Image,
    pub color: ImageHeader,
}

// ── SampleFormat ─────────────────────────────────────────────────

/// Audio sample formats, with the numeric codes used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    U8 = 1,
    S16 = 2,
    S32 = 3,
    Float = 4,
    U8Planar = 5,
    S16Planar = 6,
    S32Planar = 7,
    FloatPlanar = 8,
}

impl SampleFormat {
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::U8Planar => 1,
            SampleFormat::S16 | SampleFormat::S16Planar => 2,
            _ => 4,
        }
    }

    pub const fn is_planar(self) -> bool {
        (self as i32) >= 5
    }

    /// The interleaved variant of this format.
    pub const fn packed(self) -> Self {
        match self {
            SampleFormat::U8 | SampleFormat::U8Planar => SampleFormat::U8,
            SampleFormat::S16 | SampleFormat::S16Planar => SampleFormat::S16,
            SampleFormat::S32 | SampleFormat::S32Planar => SampleFormat::S32,
            SampleFormat::Float | SampleFormat::FloatPlanar => SampleFormat::Float,
        }
    }
}

impl TryFrom<i32> for SampleFormat {
    type Error = TeleportError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => SampleFormat::U8,
            2 => SampleFormat::S16,
            3 => SampleFormat::S32,
            4 => SampleFormat::Float,
            5 => SampleFormat::U8Planar,
            6 => SampleFormat::S16Planar,
            7 => SampleFormat::S32Planar,
            8 => SampleFormat::FloatPlanar,
            _ => return Err(TeleportError::InvalidHeader("unknown sample format")),
        })
    }
}

// ── AudioFrame ───────────────────────────────────────────────────

/// Audio parameters of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInfo {
    pub format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u32,
}

/// A block of interleaved audio samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub timestamp: u64,
    pub info: AudioInfo,
    pub frames: u32,
    pub data: Bytes,
}

impl AudioFrame {
    /// Build a packed block from host-delivered channel planes.
    ///
    /// Planar input is interleaved sample by sample and the format is
    /// rewritten to its packed variant. Packed input must arrive in
    /// `planes[0]`.
    pub fn from_planes(
        timestamp: u64,
        info: AudioInfo,
        frames: u32,
        planes: &[&[u8]],
    ) -> Result<Self, TeleportError> {
        let bps = info.format.bytes_per_sample();
        let channels = info.channels as usize;
        let frames_n = frames as usize;
        let total = bps * channels * frames_n;

        if channels == 0 {
            return Err(TeleportError::InvalidHeader("audio block without channels"));
        }

        let data = if info.format.is_planar() {
            let per_plane = frames_n * bps;
            if planes.len() < channels || planes[..channels].iter().any(|p| p.len() < per_plane) {
                return Err(TeleportError::InvalidPayloadLength {
                    expected: per_plane,
                    actual: planes.iter().map(|p| p.len()).min().unwrap_or(0),
                });
            }
            let mut out = vec![0u8; total];
            for frame in 0..frames_n {
                for (ch, plane) in planes[..channels].iter().enumerate() {
                    let dst = (frame * channels + ch) * bps;
                    out[dst..dst + bps].copy_from_slice(&plane[frame * bps..frame * bps + bps]);
                }
            }
            out
        } else {
            let plane = planes.first().copied().unwrap_or_default();
            if plane.len() < total {
                return Err(TeleportError::InvalidPayloadLength {
                    expected: total,
                    actual: plane.len(),
                });
            }
            plane[..total].to_vec()
        };

        Ok(Self {
            timestamp,
            info: AudioInfo {
                format: info.format.packed(),
                ..info
            },
            frames,
            data: Bytes::from(data),
        })
    }

    /// Reconstruct a block from a received wave header and payload.
    pub fn from_wire(
        timestamp: u64,
        header: &WaveHeader,
        payload: Bytes,
    ) -> Result<Self, TeleportError> {
        let format = SampleFormat::try_from(header.sample_format)?;
        if header.channels <= 0 || header.frames < 0 || header.sample_rate <= 0 {
            return Err(TeleportError::InvalidHeader("invalid wave header"));
        }
        let expected = format.bytes_per_sample() * header.channels as usize * header.frames as usize;
        if payload.len() != expected {
            return Err(TeleportError::InvalidPayloadLength {
                expected,
                actual: payload.len(),
            });
        }
        Ok(Self {
            timestamp,
            info: AudioInfo {
                format,
                sample_rate: header.sample_rate as u32,
                channels: header.channels as u32,
            },
            frames: header.frames as u32,
            data: payload,
        })
    }

    pub fn wave_header(&self) -> WaveHeader {
        WaveHeader {
            sample_format: self.info.format as i32,
            sample_rate: self.info.sample_rate as i32,
            channels: self.info.channels as i32,
            frames: self.frames as i32,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
