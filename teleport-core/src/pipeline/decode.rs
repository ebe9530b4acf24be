//! Consumer-side pipeline: decode in parallel, deliver in timestamp order.
//!
//! Arriving packets are inserted into a queue kept sorted by timestamp.
//! Image payloads are decoded on blocking workers; audio is interpreted
//! in place. Complete slots leave the queue head through the
//! [`StreamSession`] resync state and then reach the [`FrameSink`].
//!
//! A packet that fails to decode removes only its own slot. A packet older
//! than the last drained timestamp of its own media kind is rejected, so
//! each kind reaches the host in non-decreasing order. Audio and video are
//! judged separately: a producer may interleave them with some skew.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::{TeleportError, TransformError};
use crate::header::{ImageHeader, PacketKind};
use crate::host::{FrameSink, MediaFrame};
use crate::media::{AudioFrame, BufferPool, ImageCodec, VideoFrame};
use crate::packet::{MediaHeader, Packet};
use crate::pipeline::{Counter, DecodeConfig, DecodeStats};
use crate::state::StreamSession;

// ── Slot ─────────────────────────────────────────────────────────

#[derive(Debug)]
enum SlotState {
    Pending,
    Ready(MediaFrame),
    Corrupt,
}

#[derive(Debug)]
struct Slot {
    id: u64,
    kind: PacketKind,
    timestamp: u64,
    state: SlotState,
}

#[derive(Debug, Default)]
struct Queue {
    slots: VecDeque<Slot>,
    last_video: Option<u64>,
    last_audio: Option<u64>,
}

impl Queue {
    fn last_drained(&mut self, kind: PacketKind) -> &mut Option<u64> {
        match kind {
            PacketKind::Audio => &mut self.last_audio,
            PacketKind::Image | PacketKind::KeepAlive => &mut self.last_video,
        }
    }
}

// ── DecodePipeline ───────────────────────────────────────────────

/// Reorder buffer and resync stage feeding a [`FrameSink`].
#[derive(Clone)]
pub struct DecodePipeline {
    inner: Arc<Inner>,
}

struct Inner {
    config: DecodeConfig,
    codec: Arc<dyn ImageCodec>,
    pool: BufferPool,
    sink: Arc<dyn FrameSink>,
    queue: Mutex<Queue>,
    /// Resync state; its lock also orders delivery.
    session: Mutex<StreamSession>,
    next_id: AtomicU64,
    closed: AtomicBool,
    workers: TaskTracker,

    received: Counter,
    delivered: Counter,
    corrupt: Counter,
    late: Counter,
    dropped: Counter,
}

impl DecodePipeline {
    /// `expect_both` is the producer's advertised audio+video capability.
    pub fn new(
        config: DecodeConfig,
        codec: Arc<dyn ImageCodec>,
        sink: Arc<dyn FrameSink>,
        expect_both: bool,
    ) -> Self {
        let pool = BufferPool::new(config.pool_buffers);
        Self {
            inner: Arc::new(Inner {
                config,
                codec,
                pool,
                sink,
                queue: Mutex::new(Queue::default()),
                session: Mutex::new(StreamSession::new(expect_both)),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                workers: TaskTracker::new(),
                received: Counter::default(),
                delivered: Counter::default(),
                corrupt: Counter::default(),
                late: Counter::default(),
                dropped: Counter::default(),
            }),
        }
    }

    pub fn stats(&self) -> DecodeStats {
        let i = &self.inner;
        DecodeStats {
            received: i.received.get(),
            delivered: i.delivered.get(),
            corrupt: i.corrupt.get(),
            late: i.late.get(),
            dropped: i.dropped.get(),
        }
    }

    pub fn queued(&self) -> usize {
        self.inner.lock_queue().slots.len()
    }

    /// Whether the resync stage has started delivering.
    pub fn is_streaming(&self) -> bool {
        self.inner.lock_session().is_streaming()
    }

    /// Accept one packet from the network.
    ///
    /// Must be called from within a Tokio runtime. Keep-alive packets are
    /// ignored.
    pub fn push(&self, packet: Packet) -> Result<(), TeleportError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TeleportError::Stopped);
        }

        let timestamp = packet.timestamp();
        let media = *packet.media();
        match media {
            MediaHeader::KeepAlive => Ok(()),
            MediaHeader::Audio(wave) => {
                let state = match AudioFrame::from_wire(timestamp, &wave, packet.into_payload()) {
                    Ok(frame) => SlotState::Ready(MediaFrame::Audio(frame)),
                    Err(e) => {
                        warn!(timestamp, error = %e, "malformed audio packet");
                        SlotState::Corrupt
                    }
                };
                if self.inner.insert(PacketKind::Audio, timestamp, state, false).is_some() {
                    self.inner.drain();
                }
                Ok(())
            }
            MediaHeader::Image(color) => {
                let inserted =
                    self.inner
                        .insert(PacketKind::Image, timestamp, SlotState::Pending, true);
                let Some(id) = inserted else {
                    return Ok(());
                };
                let inner = Arc::clone(&self.inner);
                let payload = packet.into_payload();
                self.inner.workers.spawn_blocking(move || {
                    let state = inner.decode_image(timestamp, color, &payload);
                    inner.complete(id, state);
                    inner.drain();
                });
                Ok(())
            }
        }
    }

    /// Connection lost: discard everything queued, return to preroll and
    /// tell the host to blank its output.
    pub fn reset(&self) {
        let mut session = self.inner.lock_session();
        let discarded: Vec<Slot> = {
            let mut queue = self.inner.lock_queue();
            queue.last_video = None;
            queue.last_audio = None;
            queue.slots.drain(..).collect()
        };
        for slot in discarded {
            self.inner.recycle(slot.state);
        }
        session.reset();
        drop(session);

        self.inner.sink.output_reset();
    }

    /// Update the producer capability for the next connection.
    pub fn set_expect_both(&self, expect_both: bool) -> Result<(), TeleportError> {
        self.inner.lock_session().set_expect_both(expect_both)
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.workers.close();
    }

    /// Wait for every decode worker to finish. Returns only after
    /// [`close`](Self::close).
    pub async fn wait_idle(&self) {
        self.inner.workers.wait().await;
    }
}

impl std::fmt::Debug for DecodePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodePipeline")
            .field("queued", &self.queued())
            .field("stats", &self.stats())
            .finish()
    }
}

// ── Queue bookkeeping ────────────────────────────────────────────

impl Inner {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, StreamSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a slot in timestamp order. `None` when the packet is late for
    /// its kind or (for images) the queue is over its limit.
    fn insert(
        &self,
        kind: PacketKind,
        timestamp: u64,
        state: SlotState,
        limited: bool,
    ) -> Option<u64> {
        let mut queue = self.lock_queue();

        if queue.last_drained(kind).is_some_and(|last| timestamp < last) {
            self.late.incr();
            debug!(timestamp, ?kind, "late packet dropped");
            drop(queue);
            self.recycle(state);
            return None;
        }
        if limited && queue.slots.len() > self.config.max_in_flight {
            self.dropped.incr();
            debug!(timestamp, queued = queue.slots.len(), "decode queue full, packet dropped");
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let at = queue.slots.partition_point(|s| s.timestamp <= timestamp);
        queue.slots.insert(
            at,
            Slot {
                id,
                kind,
                timestamp,
                state,
            },
        );
        self.received.incr();
        Some(id)
    }

    fn decode_image(&self, timestamp: u64, color: ImageHeader, payload: &Bytes) -> SlotState {
        let decoded = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.codec.decode(payload, &self.pool)
        }))
        .unwrap_or(Err(TransformError::Aborted));

        match decoded {
            Ok(image) => SlotState::Ready(MediaFrame::Video(VideoFrame {
                timestamp,
                image,
                color,
            })),
            Err(e) => {
                warn!(timestamp, error = %e, "dropping undecodable image");
                SlotState::Corrupt
            }
        }
    }

    /// Set a slot's result. A slot discarded by `reset` is gone; its result
    /// is recycled.
    fn complete(&self, id: u64, state: SlotState) {
        let mut queue = self.lock_queue();
        match queue.slots.iter_mut().find(|s| s.id == id) {
            Some(slot) => slot.state = state,
            None => {
                drop(queue);
                self.recycle(state);
            }
        }
    }

    fn drain(&self) {
        let mut session = self.lock_session();

        let mut ready = Vec::new();
        {
            let mut queue = self.lock_queue();
            while queue
                .slots
                .front()
                .is_some_and(|s| !matches!(s.state, SlotState::Pending))
            {
                let Some(slot) = queue.slots.pop_front() else { break };
                *queue.last_drained(slot.kind) = Some(slot.timestamp);
                match slot.state {
                    SlotState::Ready(frame) => ready.push(frame),
                    SlotState::Corrupt => self.corrupt.incr(),
                    SlotState::Pending => {}
                }
            }
        }

        for frame in ready {
            let trimmed_before = session.trimmed();
            let out = session.push(frame);
            self.dropped.add(session.trimmed() - trimmed_before);
            for frame in out {
                self.deliver(frame);
            }
        }
    }

    fn deliver(&self, frame: MediaFrame) {
        match frame {
            MediaFrame::Video(v) => {
                self.sink.output_video(&v);
                self.pool.release(v.image.into_data());
            }
            MediaFrame::Audio(a) => self.sink.output_audio(&a),
        }
        self.delivered.incr();
    }

    fn recycle(&self, state: SlotState) {
        if let SlotState::Ready(MediaFrame::Video(v)) = state {
            self.pool.release(v.image.into_data());
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::WaveHeader;
    use crate::media::{Image, PixelLayout, ZstdImageCodec};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Video(u64),
        Audio(u64),
        Reset,
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl FrameSink for Recorder {
        fn output_video(&self, frame: &VideoFrame) {
            self.0.lock().unwrap().push(Event::Video(frame.timestamp));
        }
        fn output_audio(&self, frame: &AudioFrame) {
            self.0.lock().unwrap().push(Event::Audio(frame.timestamp));
        }
        fn output_reset(&self) {
            self.0.lock().unwrap().push(Event::Reset);
        }
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.0.lock().unwrap().clone()
        }
    }

    fn image_packet(ts: u64) -> Packet {
        let img = Image::new(8, 8, PixelLayout::I420, vec![ts as u8; 96]).unwrap();
        let body = ZstdImageCodec::new().encode(&img, 100).unwrap();
        Packet::image(ts, ImageHeader::default(), body)
    }

    fn audio_packet(ts: u64) -> Packet {
        let wave = WaveHeader {
            sample_format: 2,
            sample_rate: 48_000,
            channels: 2,
            frames: 1,
        };
        Packet::audio(ts, wave, vec![0u8; 4])
    }

    fn pipeline(expect_both: bool) -> (DecodePipeline, Arc<Recorder>) {
        let sink = Arc::new(Recorder::default());
        let p = DecodePipeline::new(
            DecodeConfig::default(),
            Arc::new(ZstdImageCodec::new()),
            sink.clone(),
            expect_both,
        );
        (p, sink)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_corrupt_packet_is_dropped_rest_delivered_in_order() {
        let (p, sink) = pipeline(false);

        for ts in 0..10u64 {
            if ts == 4 {
                p.push(Packet::image(ts, ImageHeader::default(), b"\xFF\xD8broken".to_vec()))
                    .unwrap();
            } else {
                p.push(image_packet(ts)).unwrap();
            }
        }
        p.close();
        p.wait_idle().await;

        let expected: Vec<_> = (0..10u64).filter(|t| *t != 4).map(Event::Video).collect();
        assert_eq!(sink.events(), expected);
        let stats = p.stats();
        assert_eq!(stats.corrupt, 1);
        assert_eq!(stats.delivered, 9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn preroll_waits_for_both_kinds_and_rebases() {
        let (p, sink) = pipeline(true);

        p.push(image_packet(1000)).unwrap();
        p.push(audio_packet(1010)).unwrap();
        p.push(image_packet(1033)).unwrap();
        p.push(audio_packet(1043)).unwrap();
        p.close();
        p.wait_idle().await;

        assert_eq!(
            sink.events(),
            vec![
                Event::Video(0),
                Event::Audio(10),
                Event::Video(33),
                Event::Audio(43)
            ]
        );
    }

    #[tokio::test]
    async fn audio_only_stream_is_delivered_without_workers() {
        let (p, sink) = pipeline(false);
        p.push(audio_packet(500)).unwrap();
        p.push(audio_packet(520)).unwrap();
        p.push(Packet::keep_alive()).unwrap();
        assert_eq!(sink.events(), vec![Event::Audio(0), Event::Audio(20)]);
        assert_eq!(p.stats().received, 2);
    }

    #[tokio::test]
    async fn late_packet_is_rejected() {
        let (p, sink) = pipeline(false);
        p.push(audio_packet(100)).unwrap();
        p.push(audio_packet(50)).unwrap();
        p.push(audio_packet(150)).unwrap();
        assert_eq!(sink.events(), vec![Event::Audio(0), Event::Audio(50)]);
        assert_eq!(p.stats().late, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn audio_trailing_drained_video_is_delivered() {
        let (p, sink) = pipeline(false);
        p.push(audio_packet(0)).unwrap();
        p.push(image_packet(100)).unwrap();

        let waited = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while sink.events().len() < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "video never drained");

        // Older than the drained video, newer than the drained audio.
        p.push(audio_packet(90)).unwrap();
        assert_eq!(
            sink.events(),
            vec![Event::Audio(0), Event::Video(100), Event::Audio(90)]
        );
        assert_eq!(p.stats().late, 0);

        // Still late against its own kind.
        p.push(audio_packet(80)).unwrap();
        assert_eq!(p.stats().late, 1);

        p.close();
        p.wait_idle().await;
    }

    #[tokio::test]
    async fn malformed_audio_counts_as_corrupt() {
        let (p, sink) = pipeline(false);
        let wave = WaveHeader {
            sample_format: 2,
            sample_rate: 48_000,
            channels: 2,
            frames: 10,
        };
        p.push(Packet::audio(1, wave, vec![0u8; 3])).unwrap();
        p.push(audio_packet(2)).unwrap();
        assert_eq!(sink.events(), vec![Event::Audio(0)]);
        assert_eq!(p.stats().corrupt, 1);
    }

    #[tokio::test]
    async fn reset_clears_queue_and_restarts_preroll() {
        let (p, sink) = pipeline(true);
        p.push(audio_packet(10)).unwrap();
        p.push(audio_packet(20)).unwrap();
        assert!(!p.is_streaming());

        p.reset();
        assert_eq!(sink.events(), vec![Event::Reset]);

        // An older timeline is accepted again after reset.
        p.push(audio_packet(5)).unwrap();
        assert!(!p.is_streaming());
        assert_eq!(p.stats().late, 0);
    }
}
