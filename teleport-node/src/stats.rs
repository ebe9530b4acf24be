//! Frame sink that counts what the receiver delivers.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use teleport_core::{AudioFrame, FrameSink, VideoFrame};

/// Counters of a [`StatsSink`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub video: u64,
    pub audio: u64,
    pub resets: u64,
    /// Latest delivered timestamp, nanoseconds from stream start.
    pub position: u64,
}

/// Stands in for a render host: records frame counts and the stream
/// position instead of presenting anything.
#[derive(Debug, Default)]
pub struct StatsSink {
    video: AtomicU64,
    audio: AtomicU64,
    resets: AtomicU64,
    position: AtomicU64,
}

impl StatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            video: self.video.load(Ordering::Relaxed),
            audio: self.audio.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            position: self.position.load(Ordering::Relaxed),
        }
    }
}

impl FrameSink for StatsSink {
    fn output_video(&self, frame: &VideoFrame) {
        let n = self.video.fetch_add(1, Ordering::Relaxed) + 1;
        self.position.fetch_max(frame.timestamp, Ordering::Relaxed);
        if n == 1 {
            info!(
                width = frame.image.width(),
                height = frame.image.height(),
                layout = ?frame.image.layout(),
                "first video frame"
            );
        }
    }

    fn output_audio(&self, frame: &AudioFrame) {
        self.audio.fetch_add(1, Ordering::Relaxed);
        self.position.fetch_max(frame.timestamp, Ordering::Relaxed);
    }

    fn output_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
        self.position.store(0, Ordering::Relaxed);
        debug!("output blanked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teleport_core::{AudioInfo, Image, ImageHeader, PixelLayout, SampleFormat};

    fn audio_block(ts: u64) -> AudioFrame {
        let info = AudioInfo {
            format: SampleFormat::U8,
            sample_rate: 8_000,
            channels: 1,
        };
        AudioFrame::from_planes(ts, info, 2, &[&[0u8, 0][..]]).unwrap()
    }

    #[test]
    fn counts_frames_and_resets_position() {
        let sink = StatsSink::new();
        let frame = VideoFrame {
            timestamp: 40,
            image: Image::new(2, 2, PixelLayout::I444, vec![0; 12]).unwrap(),
            color: ImageHeader::default(),
        };
        sink.output_video(&frame);
        sink.output_audio(&audio_block(60));
        assert_eq!(
            sink.stats(),
            SinkStats {
                video: 1,
                audio: 1,
                resets: 0,
                position: 60
            }
        );

        sink.output_reset();
        let stats = sink.stats();
        assert_eq!(stats.resets, 1);
        assert_eq!(stats.position, 0);
    }
}
