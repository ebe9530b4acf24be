//! In-memory media: frame types, the transform stage and buffer recycling.
//!
//! | Module      | Purpose                                          |
//! |-------------|--------------------------------------------------|
//! | `types`     | `Image`, `VideoFrame`, `AudioFrame`, formats      |
//! | `transform` | `ImageCodec` trait and the zstd implementation    |
//! | `pool`      | Bounded `BufferPool` for raw plane buffers        |

pub mod pool;
pub mod transform;
pub mod types;

pub use pool::BufferPool;
pub use transform::{ImageCodec, ZstdImageCodec};
pub use types::{AudioFrame, AudioInfo, Image, PixelLayout, SampleFormat, VideoFrame};
