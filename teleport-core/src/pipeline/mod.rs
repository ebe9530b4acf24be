//! Ordered packet pipelines.
//!
//! Both directions run the media transform on blocking worker threads, one
//! task per packet, and release results strictly from the queue head:
//!
//! ```text
//!  submit ──► [ slot | slot | slot … ] ──► drain while head is complete
//!                 ▲      ▲      ▲
//!              worker  worker  worker   (complete in any order)
//! ```
//!
//! | Module   | Purpose                                              |
//! |----------|------------------------------------------------------|
//! | `encode` | Producer side: FIFO by capture order, fan-out drain   |
//! | `decode` | Consumer side: timestamp-sorted, resync, host output  |
//!
//! Timestamps are nanoseconds on the producer's clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;

pub mod decode;
pub mod encode;

pub use decode::DecodePipeline;
pub use encode::EncodePipeline;

/// Queue length above which new image packets are dropped.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 20;
/// Media-time span between queue head and tail that counts as lag.
pub const DEFAULT_LAG_THRESHOLD: Duration = Duration::from_secs(1);

// ── DrainSink ────────────────────────────────────────────────────

/// Destination of the encode pipeline's ordered output.
///
/// Called with one fully serialized frame at a time, in capture order,
/// from a blocking worker thread.
pub trait DrainSink: Send + Sync + 'static {
    fn deliver(&self, frame: Bytes);
}

// ── Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EncodeConfig {
    /// Drop a submitted frame when more slots than this are queued.
    pub max_in_flight: usize,
    /// Count a lag event when the queue spans more media time than this.
    pub lag_threshold: Duration,
    /// Initial compression quality, 0..=100.
    pub quality: u8,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            lag_threshold: DEFAULT_LAG_THRESHOLD,
            quality: 90,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Drop an arriving image packet when more slots than this are queued.
    pub max_in_flight: usize,
    /// Idle plane buffers kept for reuse.
    pub pool_buffers: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            pool_buffers: 32,
        }
    }
}

// ── Stats ────────────────────────────────────────────────────────

/// Counters of the encode pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeStats {
    /// Frames accepted into the queue.
    pub submitted: u64,
    /// Frames handed to the drain sink.
    pub delivered: u64,
    /// Frames rejected because the queue was full.
    pub dropped: u64,
    /// Frames whose transform failed.
    pub failed: u64,
    /// Submissions that found the queue lagging.
    pub lagged: u64,
}

/// Counters of the decode pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Packets accepted into the queue.
    pub received: u64,
    /// Frames handed to the host sink.
    pub delivered: u64,
    /// Packets whose payload failed to decode.
    pub corrupt: u64,
    /// Packets older than the last drained one.
    pub late: u64,
    /// Packets dropped by the in-flight limit or preroll trimming.
    pub dropped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counter(AtomicU64);

impl Counter {
    pub(crate) fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
