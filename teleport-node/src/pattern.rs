//! Synthetic capture source: a moving luma bar and a sine tone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::warn;

use teleport_core::{
    AudioFrame, AudioInfo, BufferPool, FrameSource, Image, ImageHeader, MediaFrame, PixelLayout,
    SampleFormat, VideoFrame,
};

const TONE_HZ: f32 = 440.0;
const CHANNELS: u32 = 2;

/// Generates I420 video at `fps` and interleaved S16 stereo audio, one
/// audio block per video frame, timestamped from the moment of creation.
pub struct TestPattern {
    width: u32,
    height: u32,
    sample_rate: u32,
    with_audio: bool,
    pool: Arc<BufferPool>,
    ticker: Interval,
    start: Instant,
    frame_no: u64,
    sample_no: u64,
    pending_audio: Option<AudioFrame>,
}

impl TestPattern {
    pub fn new(
        width: u32,
        height: u32,
        fps: u32,
        sample_rate: u32,
        with_audio: bool,
        pool: Arc<BufferPool>,
    ) -> Self {
        let period = Duration::from_secs(1) / fps.clamp(1, 240);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            width: width.clamp(2, 7680) & !1,
            height: height.clamp(2, 4320) & !1,
            sample_rate: sample_rate.clamp(8_000, 192_000),
            with_audio,
            pool,
            ticker,
            start: Instant::now(),
            frame_no: 0,
            sample_no: 0,
            pending_audio: None,
        }
    }

    fn video(&mut self, timestamp: u64) -> Option<VideoFrame> {
        let layout = PixelLayout::I420;
        let len = layout.buffer_len(self.width, self.height);
        let mut data = self.pool.acquire(len);
        data.resize(len, 128);

        let w = self.width as usize;
        let luma = w * self.height as usize;
        let bar = (self.frame_no as usize * 4) % w;
        for (i, px) in data[..luma].iter_mut().enumerate() {
            let x = i % w;
            *px = if x.abs_diff(bar) < 16 { 235 } else { 16 };
        }
        self.frame_no += 1;

        match Image::new(self.width, self.height, layout, data) {
            Ok(image) => Some(VideoFrame {
                timestamp,
                image,
                color: ImageHeader::default(),
            }),
            Err(e) => {
                warn!(error = %e, "test pattern image rejected");
                None
            }
        }
    }

    fn audio(&mut self, timestamp: u64, frames: u32) -> Option<AudioFrame> {
        let mut data = Vec::with_capacity(frames as usize * CHANNELS as usize * 2);
        for n in 0..frames as u64 {
            let t = (self.sample_no + n) as f32 / self.sample_rate as f32;
            let s = ((t * TONE_HZ * std::f32::consts::TAU).sin() * 8_000.0) as i16;
            for _ in 0..CHANNELS {
                data.extend_from_slice(&s.to_le_bytes());
            }
        }
        self.sample_no += frames as u64;

        let info = AudioInfo {
            format: SampleFormat::S16,
            sample_rate: self.sample_rate,
            channels: CHANNELS,
        };
        match AudioFrame::from_planes(timestamp, info, frames, &[data.as_slice()]) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "test tone block rejected");
                None
            }
        }
    }
}

#[async_trait]
impl FrameSource for TestPattern {
    async fn next_frame(&mut self) -> Option<MediaFrame> {
        if let Some(audio) = self.pending_audio.take() {
            return Some(MediaFrame::Audio(audio));
        }

        loop {
            self.ticker.tick().await;
            let timestamp = self.start.elapsed().as_nanos() as u64;

            if self.with_audio {
                let due = (self.start.elapsed().as_secs_f64() * self.sample_rate as f64) as u64;
                let frames = due.saturating_sub(self.sample_no).min(u32::MAX as u64) as u32;
                if frames > 0 {
                    self.pending_audio = self.audio(timestamp, frames);
                }
            }

            if let Some(video) = self.video(timestamp) {
                return Some(MediaFrame::Video(video));
            }
        }
    }

    fn audio_and_video(&self) -> bool {
        self.with_audio
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_video_then_matching_audio() {
        let mut pattern = TestPattern::new(32, 16, 100, 48_000, true, Arc::new(BufferPool::new(4)));
        let mut video = 0;
        let mut audio = 0;
        let mut last_ts = 0;

        for _ in 0..10 {
            let frame = pattern.next_frame().await.unwrap();
            assert!(frame.timestamp() >= last_ts);
            last_ts = frame.timestamp();
            match frame {
                MediaFrame::Video(v) => {
                    assert_eq!(v.image.width(), 32);
                    assert_eq!(v.image.data().len(), 32 * 16 * 3 / 2);
                    video += 1;
                }
                MediaFrame::Audio(a) => {
                    assert_eq!(a.info.channels, 2);
                    assert_eq!(a.data.len(), a.frames as usize * 4);
                    audio += 1;
                }
            }
        }
        assert!(video >= 5);
        assert!(audio >= 1);
        assert!(pattern.audio_and_video());
    }

    #[tokio::test]
    async fn video_only_pattern_never_yields_audio() {
        let mut pattern = TestPattern::new(8, 8, 200, 48_000, false, Arc::new(BufferPool::new(4)));
        for _ in 0..5 {
            assert!(matches!(
                pattern.next_frame().await,
                Some(MediaFrame::Video(_))
            ));
        }
    }

    #[test]
    fn odd_dimensions_are_rounded_down() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let pattern = TestPattern::new(33, 17, 30, 48_000, false, Arc::new(BufferPool::new(1)));
        assert_eq!((pattern.width, pattern.height), (32, 16));
    }
}
