//! Receiver-side stream session: audio/video resynchronisation.
//!
//! Frames reach the session already sorted by timestamp. The session
//! decides when delivery may start and re-zeroes the timeline.
//!
//! ```text
//!              both media types seen
//!  Prerolling ──────────────────────► Streaming { base_offset }
//!      ▲                                    │
//!      └──────────── reset() ◄──────────────┘   (connection lost)
//! ```
//!
//! A peer that advertises a single media type skips the wait: the first
//! frame fixes the base offset.

use tracing::{debug, info};

use crate::error::TeleportError;
use crate::header::PacketKind;
use crate::host::MediaFrame;
use crate::media::{AudioInfo, PixelLayout};

// ── StreamPhase ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPhase {
    /// Holding frames until delivery can start.
    #[default]
    Prerolling,
    /// Delivering frames, timestamps shifted by `base_offset`.
    Streaming { base_offset: u64 },
}

impl std::fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prerolling => write!(f, "Prerolling"),
            Self::Streaming { .. } => write!(f, "Streaming"),
        }
    }
}

// ── StreamSession ────────────────────────────────────────────────

/// Per-connection resync state.
#[derive(Debug, Default)]
pub struct StreamSession {
    expect_both: bool,
    phase: StreamPhase,
    held: Vec<MediaFrame>,
    trimmed: u64,
    video_format: Option<(u32, u32, PixelLayout)>,
    audio_format: Option<AudioInfo>,
}

impl StreamSession {
    /// `expect_both` is the peer's advertised audio+video capability.
    pub fn new(expect_both: bool) -> Self {
        Self {
            expect_both,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.phase, StreamPhase::Streaming { .. })
    }

    pub fn base_offset(&self) -> Option<u64> {
        match self.phase {
            StreamPhase::Streaming { base_offset } => Some(base_offset),
            StreamPhase::Prerolling => None,
        }
    }

    /// Frames currently held back by preroll.
    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Frames discarded by preroll trimming since creation.
    pub fn trimmed(&self) -> u64 {
        self.trimmed
    }

    pub fn video_format(&self) -> Option<(u32, u32, PixelLayout)> {
        self.video_format
    }

    pub fn audio_format(&self) -> Option<AudioInfo> {
        self.audio_format
    }

    /// Update the peer capability, e.g. after discovery refreshed it.
    /// Only allowed between connections.
    pub fn set_expect_both(&mut self, expect_both: bool) -> Result<(), TeleportError> {
        match self.phase {
            StreamPhase::Prerolling if self.held.is_empty() => {
                self.expect_both = expect_both;
                Ok(())
            }
            _ => Err(TeleportError::ProtocolViolation(
                "cannot change capability: stream in progress",
            )),
        }
    }

    /// Return to `Prerolling`, dropping anything held.
    pub fn reset(&mut self) {
        if !self.held.is_empty() {
            debug!(held = self.held.len(), "discarding prerolled frames");
        }
        self.held.clear();
        self.phase = StreamPhase::Prerolling;
    }

    /// Accept the next frame in timestamp order and return the frames now
    /// deliverable, with timestamps relative to the base offset.
    pub fn push(&mut self, frame: MediaFrame) -> Vec<MediaFrame> {
        self.learn_format(&frame);

        if let StreamPhase::Streaming { base_offset } = self.phase {
            return vec![rebase(frame, base_offset)];
        }

        // Trim the lead-in as it grows: of a same-kind run only the newest
        // frame is kept.
        if self.expect_both
            && self
                .held
                .last()
                .is_some_and(|last| kind_of(last) == kind_of(&frame))
        {
            self.trimmed += self.held.len() as u64;
            self.held.clear();
        }

        self.held.push(frame);
        if self.expect_both && !self.has_both_kinds() {
            return Vec::new();
        }

        self.finish_preroll()
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn has_both_kinds(&self) -> bool {
        let mut video = false;
        let mut audio = false;
        for frame in &self.held {
            match frame {
                MediaFrame::Video(_) => video = true,
                MediaFrame::Audio(_) => audio = true,
            }
        }
        video && audio
    }

    /// Fix the base offset on the held head and release everything held.
    fn finish_preroll(&mut self) -> Vec<MediaFrame> {
        let Some(head) = self.held.first() else {
            return Vec::new();
        };
        let base_offset = head.timestamp();
        self.phase = StreamPhase::Streaming { base_offset };
        info!(base_offset, "stream synchronised");

        self.held
            .drain(..)
            .map(|f| rebase(f, base_offset))
            .collect()
    }

    fn learn_format(&mut self, frame: &MediaFrame) {
        match frame {
            MediaFrame::Video(v) => {
                let format = (v.image.width(), v.image.height(), v.image.layout());
                if self.video_format != Some(format) {
                    info!(
                        width = format.0,
                        height = format.1,
                        layout = ?format.2,
                        "video format"
                    );
                    self.video_format = Some(format);
                }
            }
            MediaFrame::Audio(a) => {
                if self.audio_format != Some(a.info) {
                    info!(
                        format = ?a.info.format,
                        sample_rate = a.info.sample_rate,
                        channels = a.info.channels,
                        "audio format"
                    );
                    self.audio_format = Some(a.info);
                }
            }
        }
    }
}

fn kind_of(frame: &MediaFrame) -> PacketKind {
    match frame {
        MediaFrame::Video(_) => PacketKind::Image,
        MediaFrame::Audio(_) => PacketKind::Audio,
    }
}

fn rebase(frame: MediaFrame, base_offset: u64) -> MediaFrame {
    match frame {
        MediaFrame::Video(mut v) => {
            v.timestamp = v.timestamp.saturating_sub(base_offset);
            MediaFrame::Video(v)
        }
        MediaFrame::Audio(mut a) => {
            a.timestamp = a.timestamp.saturating_sub(base_offset);
            MediaFrame::Audio(a)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
