//! # teleport-core
//!
//! Real-time media relay between two hosts on a local network.
//!
//! This crate contains:
//! - **Wire protocol**: `FrameHeader`, `ImageHeader`, `WaveHeader`, the `OPTS`
//!   handshake and the discovery announcement
//! - **Codec**: `MediaCodec` for framed TCP I/O via `tokio_util`
//! - **Media**: planar images, audio blocks, the `ImageCodec` transform and a
//!   `BufferPool` for frame buffers
//! - **Pipelines**: ordered, bounded, lag-aware encode and decode pipelines
//! - **Network**: the per-consumer fan-out `Sender` and the receiving `MediaStream`
//! - **State**: link and stream state machines (dialing, preroll, streaming)
//! - **Discovery**: UDP broadcast announcer and TTL peer table
//! - **Session**: `ProducerSession` and `ReceiverSession` owning all of the above
//! - **Error**: `TeleportError`, typed `thiserror`-based error hierarchy

pub mod codec;
pub mod discovery;
pub mod error;
pub mod header;
pub mod host;
pub mod media;
pub mod network;
pub mod packet;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::MediaCodec;
pub use discovery::{Announcer, DiscoveryConfig, Peer, PeerListener, PeerTable};
pub use error::{TeleportError, TransformError};
pub use header::{FrameHeader, ImageHeader, OptionsHeader, PacketKind, WaveHeader};
pub use host::{FrameSink, FrameSource, MediaFrame};
pub use media::{
    AudioFrame, AudioInfo, BufferPool, Image, ImageCodec, PixelLayout, SampleFormat, VideoFrame,
    ZstdImageCodec,
};
pub use network::{
    ConnectionId, ConnectionInfo, MediaStream, OverflowPolicy, Sender, SenderConfig, SenderStats,
};
pub use packet::{MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, MediaHeader, Packet};
pub use pipeline::{
    DecodeConfig, DecodePipeline, DecodeStats, DrainSink, EncodeConfig, EncodePipeline,
    EncodeStats,
};
pub use protocol::{AnnouncePayload, PROTOCOL_VERSION, StreamOptions};
pub use session::{
    ProducerConfig, ProducerSession, ProducerStats, ReceiverConfig, ReceiverSession,
    ReceiverTarget,
};
pub use state::{LinkPhase, StreamPhase, StreamSession};
