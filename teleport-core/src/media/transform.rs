//! Media transform stage: image compression behind a uniform interface.
//!
//! [`ImageCodec`] implementations are stateless and shared between every
//! transform worker, so `encode`/`decode` take `&self` and must be safe to
//! call concurrently.
//!
//! The bundled [`ZstdImageCodec`] compresses the planar samples with zstd.
//! Its payload layout (little-endian):
//!
//! ```text
//! magic:    [u8; 4] "TPZ1"
//! width:    u32
//! height:   u32
//! layout:   u8      (PixelLayout code)
//! shift:    u8      (low bits dropped by quantisation, 0 = lossless)
//! reserved: [u8; 2]
//! body:     zstd frame of the concatenated planes
//! ```

use std::borrow::Cow;
use std::io::Read;

use crate::error::TransformError;
use crate::media::pool::BufferPool;
use crate::media::types::{Image, PixelLayout};

/// Compress and decompress images.
pub trait ImageCodec: Send + Sync + 'static {
    /// Compress `image` at `quality` (0..=100, 100 = best).
    fn encode(&self, image: &Image, quality: u8) -> Result<Vec<u8>, TransformError>;

    /// Decompress `bytes`, allocating the image planes from `pool`.
    ///
    /// Returns [`TransformError::Corrupt`] when `bytes` is not a valid
    /// payload for this codec.
    fn decode(&self, bytes: &[u8], pool: &BufferPool) -> Result<Image, TransformError>;
}

// ── ZstdImageCodec ───────────────────────────────────────────────

const MAGIC: [u8; 4] = *b"TPZ1";
const INNER_HEADER_SIZE: usize = 16;
/// Largest accepted image edge; guards the decode allocation.
const MAX_DIMENSION: u32 = 16_384;

/// zstd-backed image codec with quality-driven quantisation.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZstdImageCodec;

impl ZstdImageCodec {
    pub fn new() -> Self {
        Self
    }

    /// Low bits dropped from each sample. 76..=100 is lossless.
    fn quantisation_shift(quality: u8) -> u8 {
        ((100 - quality.min(100) as u32) / 25).min(3) as u8
    }

    /// zstd level: lower quality buys a smaller payload.
    fn compression_level(quality: u8) -> i32 {
        1 + (100 - quality.min(100) as i32) / 12
    }
}

impl ImageCodec for ZstdImageCodec {
    fn encode(&self, image: &Image, quality: u8) -> Result<Vec<u8>, TransformError> {
        if image.width() > MAX_DIMENSION || image.height() > MAX_DIMENSION {
            return Err(TransformError::Unsupported(format!(
                "image {}x{} exceeds {MAX_DIMENSION}",
                image.width(),
                image.height()
            )));
        }

        let shift = Self::quantisation_shift(quality);
        let samples: Cow<'_, [u8]> = if shift == 0 {
            Cow::Borrowed(image.data())
        } else {
            let mid = (1u8 << shift) >> 1;
            Cow::Owned(
                image
                    .data()
                    .iter()
                    .map(|&s| ((s >> shift) << shift) | mid)
                    .collect(),
            )
        };

        let body = zstd::encode_all(&samples[..], Self::compression_level(quality))
            .map_err(|e| TransformError::Compression(e.to_string()))?;

        let mut out = Vec::with_capacity(INNER_HEADER_SIZE + body.len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&image.width().to_le_bytes());
        out.extend_from_slice(&image.height().to_le_bytes());
        out.push(image.layout().code());
        out.push(shift);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8], pool: &BufferPool) -> Result<Image, TransformError> {
        if bytes.len() < INNER_HEADER_SIZE || bytes[0..4] != MAGIC {
            return Err(TransformError::Corrupt("missing image header".into()));
        }

        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[4..8]);
        let width = u32::from_le_bytes(word);
        word.copy_from_slice(&bytes[8..12]);
        let height = u32::from_le_bytes(word);

        let layout = PixelLayout::from_code(bytes[12])
            .ok_or_else(|| TransformError::Corrupt(format!("unknown layout {}", bytes[12])))?;
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(TransformError::Corrupt(format!("bad dimensions {width}x{height}")));
        }

        let expected = layout.buffer_len(width, height);
        let mut buf = pool.acquire(expected);
        // One byte of slack so an oversized body shows up as a length mismatch.
        let limit = expected as u64 + 1;
        let read = zstd::stream::read::Decoder::new(&bytes[INNER_HEADER_SIZE..])
            .and_then(|decoder| decoder.take(limit).read_to_end(&mut buf));
        let written = match read {
            Ok(n) => n,
            Err(e) => {
                pool.release(buf);
                return Err(TransformError::Corrupt(format!("zstd decode failed: {e}")));
            }
        };
        if written != expected {
            pool.release(buf);
            return Err(TransformError::Corrupt(format!(
                "decompressed {written} bytes, expected {expected}"
            )));
        }

        Image::new(width, height, layout, buf)
    }
}

// ── Tests ────────────────────────────────────────────────────────
