//! Capabilities the embedding host provides.
//!
//! The relay never talks to a capture or render API directly. A producer
//! pulls frames from a [`FrameSource`]; a receiver pushes decoded frames
//! into a [`FrameSink`]. Both are injected, so sessions can run against
//! synthetic sources and recording sinks in tests.

use async_trait::async_trait;

use crate::media::{AudioFrame, VideoFrame};

/// One unit of media, captured or decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaFrame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

impl MediaFrame {
    pub fn timestamp(&self) -> u64 {
        match self {
            MediaFrame::Video(f) => f.timestamp,
            MediaFrame::Audio(f) => f.timestamp,
        }
    }
}

/// Pull-based source of captured frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame. `None` means the source is exhausted.
    async fn next_frame(&mut self) -> Option<MediaFrame>;

    /// Whether this source produces both audio and video. Advertised to
    /// consumers so they know to preroll.
    fn audio_and_video(&self) -> bool;
}

/// Receiver of decoded, re-timed frames.
///
/// Callbacks run on the receiver's delivery path and must not block for
/// long; timestamps are already relative to the start of the stream.
pub trait FrameSink: Send + Sync + 'static {
    fn output_video(&self, frame: &VideoFrame);

    fn output_audio(&self, frame: &AudioFrame);

    /// The stream was interrupted. The host should blank its output until
    /// new frames arrive.
    fn output_reset(&self);
}
