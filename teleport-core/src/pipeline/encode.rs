//! Producer-side pipeline: compress frames in parallel, emit in capture order.
//!
//! Each submitted frame takes a slot at the queue tail and is finished on
//! a blocking worker: video is compressed, audio only serialized. Whenever
//! a slot completes, the queue is drained from the head while the head is
//! complete, and each serialized frame is handed to the [`DrainSink`].
//!
//! The queue lock only covers slot bookkeeping. A separate delivery lock
//! keeps drained batches in order without holding the queue while the
//! sink writes.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::error::{TeleportError, TransformError};
use crate::media::{AudioFrame, BufferPool, ImageCodec, VideoFrame};
use crate::packet::Packet;
use crate::pipeline::{Counter, DrainSink, EncodeConfig, EncodeStats};

// ── Slot ─────────────────────────────────────────────────────────

#[derive(Debug)]
enum SlotState {
    Pending,
    Ready(Bytes),
    Failed,
}

#[derive(Debug)]
struct Slot {
    id: u64,
    timestamp: u64,
    state: SlotState,
}

// ── EncodePipeline ───────────────────────────────────────────────

/// Ordered encode queue feeding a [`DrainSink`].
///
/// Cloning yields another handle to the same pipeline.
#[derive(Clone)]
pub struct EncodePipeline {
    inner: Arc<Inner>,
}

struct Inner {
    config: EncodeConfig,
    codec: Arc<dyn ImageCodec>,
    pool: Arc<BufferPool>,
    sink: Arc<dyn DrainSink>,
    queue: Mutex<VecDeque<Slot>>,
    delivery: Mutex<()>,
    next_id: AtomicU64,
    quality: AtomicU8,
    closed: AtomicBool,
    workers: TaskTracker,

    submitted: Counter,
    delivered: Counter,
    dropped: Counter,
    failed: Counter,
    lagged: Counter,
}

impl EncodePipeline {
    pub fn new(
        config: EncodeConfig,
        codec: Arc<dyn ImageCodec>,
        pool: Arc<BufferPool>,
        sink: Arc<dyn DrainSink>,
    ) -> Self {
        let quality = AtomicU8::new(config.quality.min(100));
        Self {
            inner: Arc::new(Inner {
                config,
                codec,
                pool,
                sink,
                queue: Mutex::new(VecDeque::new()),
                delivery: Mutex::new(()),
                next_id: AtomicU64::new(0),
                quality,
                closed: AtomicBool::new(false),
                workers: TaskTracker::new(),
                submitted: Counter::default(),
                delivered: Counter::default(),
                dropped: Counter::default(),
                failed: Counter::default(),
                lagged: Counter::default(),
            }),
        }
    }

    /// Quality used for frames submitted from now on.
    pub fn set_quality(&self, quality: u8) {
        self.inner.quality.store(quality.min(100), Ordering::Relaxed);
    }

    pub fn quality(&self) -> u8 {
        self.inner.quality.load(Ordering::Relaxed)
    }

    /// Slots currently queued, complete or not.
    pub fn queued(&self) -> usize {
        self.inner.lock_queue().len()
    }

    pub fn stats(&self) -> EncodeStats {
        let i = &self.inner;
        EncodeStats {
            submitted: i.submitted.get(),
            delivered: i.delivered.get(),
            dropped: i.dropped.get(),
            failed: i.failed.get(),
            lagged: i.lagged.get(),
        }
    }

    /// Queue a video frame and compress it on a blocking worker.
    ///
    /// Must be called from within a Tokio runtime. A frame arriving while
    /// the queue is over its in-flight limit is dropped and counted; its
    /// plane buffer goes back to the pool.
    pub fn submit_video(&self, frame: VideoFrame) -> Result<(), TeleportError> {
        self.ensure_open()?;

        let Some(id) = self.inner.enqueue(frame.timestamp, SlotState::Pending) else {
            self.inner.pool.release(frame.image.into_data());
            return Ok(());
        };

        let inner = Arc::clone(&self.inner);
        let quality = self.quality();
        self.inner.workers.spawn_blocking(move || {
            let VideoFrame {
                timestamp,
                image,
                color,
            } = frame;

            let encoded = std::panic::catch_unwind(AssertUnwindSafe(|| {
                inner.codec.encode(&image, quality)
            }))
            .unwrap_or(Err(TransformError::Aborted));
            inner.pool.release(image.into_data());

            let state = match encoded.map_err(TeleportError::from).and_then(|body| {
                Packet::image(timestamp, color, body).to_bytes()
            }) {
                Ok(bytes) => SlotState::Ready(bytes),
                Err(e) => {
                    warn!(timestamp, error = %e, "image encode failed");
                    SlotState::Failed
                }
            };

            inner.complete(id, state);
            inner.drain();
        });
        Ok(())
    }

    /// Queue an audio block. No transform is needed, but serialization and
    /// the drain still run on a worker so the sink is only ever called
    /// from blocking threads; the block waits behind earlier video.
    pub fn submit_audio(&self, frame: AudioFrame) -> Result<(), TeleportError> {
        self.ensure_open()?;

        let Some(id) = self.inner.enqueue(frame.timestamp, SlotState::Pending) else {
            return Ok(());
        };

        let inner = Arc::clone(&self.inner);
        self.inner.workers.spawn_blocking(move || {
            let state = match Packet::audio(frame.timestamp, frame.wave_header(), frame.data)
                .to_bytes()
            {
                Ok(bytes) => SlotState::Ready(bytes),
                Err(e) => {
                    warn!(timestamp = frame.timestamp, error = %e, "audio packet rejected");
                    SlotState::Failed
                }
            };
            inner.complete(id, state);
            inner.drain();
        });
        Ok(())
    }

    /// Stop accepting submissions. In-flight work keeps running.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.workers.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Wait until every worker spawned so far has finished and drained.
    /// Returns only after [`close`](Self::close).
    pub async fn wait_idle(&self) {
        self.inner.workers.wait().await;
    }

    fn ensure_open(&self) -> Result<(), TeleportError> {
        if self.is_closed() {
            Err(TeleportError::Stopped)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for EncodePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodePipeline")
            .field("queued", &self.queued())
            .field("quality", &self.quality())
            .field("stats", &self.stats())
            .finish()
    }
}

// ── Queue bookkeeping ────────────────────────────────────────────

impl Inner {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Slot>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a slot, or return `None` if the queue is over its limit.
    fn enqueue(&self, timestamp: u64, state: SlotState) -> Option<u64> {
        let mut queue = self.lock_queue();

        if queue.len() > self.config.max_in_flight {
            self.dropped.incr();
            debug!(timestamp, queued = queue.len(), "encode queue full, frame dropped");
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        queue.push_back(Slot {
            id,
            timestamp,
            state,
        });
        self.submitted.incr();

        if let Some(head) = queue.front() {
            let span = timestamp.saturating_sub(head.timestamp);
            if span > self.config.lag_threshold.as_nanos() as u64 {
                self.lagged.incr();
                warn!(
                    span_ms = span / 1_000_000,
                    queued = queue.len(),
                    "encoder is lagging behind capture"
                );
            }
        }

        Some(id)
    }

    fn complete(&self, id: u64, state: SlotState) {
        let mut queue = self.lock_queue();
        if let Some(slot) = queue.iter_mut().find(|s| s.id == id) {
            slot.state = state;
        }
    }

    /// Release every complete slot at the head, in order.
    fn drain(&self) {
        let _order = self.delivery.lock().unwrap_or_else(|e| e.into_inner());

        let mut ready = Vec::new();
        {
            let mut queue = self.lock_queue();
            while queue
                .front()
                .is_some_and(|s| !matches!(s.state, SlotState::Pending))
            {
                let Some(slot) = queue.pop_front() else { break };
                match slot.state {
                    SlotState::Ready(bytes) => ready.push(bytes),
                    SlotState::Failed => self.failed.incr(),
                    SlotState::Pending => {}
                }
            }
        }

        for bytes in ready {
            trace!(len = bytes.len(), "drained frame");
            self.sink.deliver(bytes);
            self.delivered.incr();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{FrameHeader, ImageHeader, PacketKind};
    use crate::media::{AudioInfo, Image, PixelLayout, SampleFormat, ZstdImageCodec};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Bytes>>);

    impl DrainSink for Recorder {
        fn deliver(&self, frame: Bytes) {
            self.0.lock().unwrap().push(frame);
        }
    }

    impl Recorder {
        fn timestamps(&self) -> Vec<u64> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .map(|b| FrameHeader::decode(b).unwrap().timestamp)
                .collect()
        }
    }

    /// Sleeps for the number of milliseconds stored in the first sample,
    /// so completion order can be scripted.
    struct ScriptedCodec;

    impl ImageCodec for ScriptedCodec {
        fn encode(&self, image: &Image, _quality: u8) -> Result<Vec<u8>, TransformError> {
            let delay = image.data()[0];
            std::thread::sleep(Duration::from_millis(delay as u64));
            if delay == 255 {
                return Err(TransformError::Unsupported("scripted failure".into()));
            }
            Ok(image.data().to_vec())
        }

        fn decode(&self, _bytes: &[u8], _pool: &BufferPool) -> Result<Image, TransformError> {
            Err(TransformError::Unsupported("encode only".into()))
        }
    }

    fn frame(ts: u64, first_sample: u8) -> VideoFrame {
        let mut data = vec![0u8; 12];
        data[0] = first_sample;
        VideoFrame {
            timestamp: ts,
            image: Image::new(2, 2, PixelLayout::I444, data).unwrap(),
            color: ImageHeader::default(),
        }
    }

    fn audio(ts: u64) -> AudioFrame {
        AudioFrame {
            timestamp: ts,
            info: AudioInfo {
                format: SampleFormat::Float,
                sample_rate: 48_000,
                channels: 1,
            },
            frames: 2,
            data: Bytes::from_static(&[0; 8]),
        }
    }

    fn pipeline(codec: Arc<dyn ImageCodec>, config: EncodeConfig) -> (EncodePipeline, Arc<Recorder>) {
        let sink = Arc::new(Recorder::default());
        let p = EncodePipeline::new(config, codec, Arc::new(BufferPool::new(8)), sink.clone());
        (p, sink)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn output_follows_submission_order_despite_completion_order() {
        let (p, sink) = pipeline(Arc::new(ScriptedCodec), EncodeConfig::default());

        // Earlier frames take longest, so workers finish in reverse.
        let delays = [80u8, 60, 40, 20, 0, 30, 10];
        for (i, d) in delays.iter().enumerate() {
            p.submit_video(frame(i as u64 * 1000, *d)).unwrap();
        }

        p.close();
        p.wait_idle().await;

        assert_eq!(sink.timestamps(), vec![0, 1000, 2000, 3000, 4000, 5000, 6000]);
        assert_eq!(p.stats().delivered, 7);
        assert_eq!(p.queued(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn audio_waits_behind_pending_video() {
        let (p, sink) = pipeline(Arc::new(ScriptedCodec), EncodeConfig::default());

        p.submit_video(frame(0, 50)).unwrap();
        p.submit_audio(audio(10)).unwrap();
        assert!(sink.timestamps().is_empty());

        p.close();
        p.wait_idle().await;

        let frames = sink.0.lock().unwrap().clone();
        let kinds: Vec<_> = frames
            .iter()
            .map(|b| FrameHeader::decode(b).unwrap().kind)
            .collect();
        assert_eq!(kinds, vec![PacketKind::Image, PacketKind::Audio]);
    }

    #[tokio::test]
    async fn failed_transform_is_skipped() {
        let (p, sink) = pipeline(Arc::new(ScriptedCodec), EncodeConfig::default());

        p.submit_video(frame(1, 0)).unwrap();
        p.submit_video(frame(2, 255)).unwrap();
        p.submit_video(frame(3, 0)).unwrap();
        p.close();
        p.wait_idle().await;

        assert_eq!(sink.timestamps(), vec![1, 3]);
        assert_eq!(p.stats().failed, 1);
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let config = EncodeConfig {
            max_in_flight: 2,
            ..EncodeConfig::default()
        };
        let (p, sink) = pipeline(Arc::new(ScriptedCodec), config);

        for ts in 0..6 {
            p.submit_video(frame(ts, 100)).unwrap();
        }
        p.close();
        p.wait_idle().await;

        let stats = p.stats();
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.dropped, 3);
        assert_eq!(sink.timestamps(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn lag_is_counted_not_fatal() {
        let (p, sink) = pipeline(Arc::new(ScriptedCodec), EncodeConfig::default());

        p.submit_video(frame(0, 100)).unwrap();
        p.submit_audio(audio(2_000_000_000)).unwrap();
        p.close();
        p.wait_idle().await;

        assert_eq!(p.stats().lagged, 1);
        assert_eq!(sink.timestamps(), vec![0, 2_000_000_000]);
    }

    #[tokio::test]
    async fn closed_pipeline_rejects_submissions() {
        let (p, _sink) = pipeline(Arc::new(ZstdImageCodec::new()), EncodeConfig::default());
        p.close();
        assert!(matches!(
            p.submit_video(frame(0, 0)),
            Err(TeleportError::Stopped)
        ));
        assert!(matches!(p.submit_audio(audio(0)), Err(TeleportError::Stopped)));
    }

    #[tokio::test]
    async fn encoded_frame_is_a_complete_wire_packet() {
        let (p, sink) = pipeline(Arc::new(ZstdImageCodec::new()), EncodeConfig::default());
        p.set_quality(100);
        p.submit_video(frame(42, 7)).unwrap();
        p.close();
        p.wait_idle().await;

        let bytes = sink.0.lock().unwrap()[0].clone();
        let packet = Packet::from_bytes(bytes).unwrap();
        assert_eq!(packet.kind(), PacketKind::Image);
        assert_eq!(packet.timestamp(), 42);
    }
}
