//! Session objects owning a producer or receiver end to end.
//!
//! A session replaces any process-wide state: it owns its pipeline, its
//! sockets and its background tasks, and `stop` joins all of them before
//! returning, so a new session never overlaps the old one.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::discovery::{DiscoveryConfig, PeerTable};
use crate::network::{ConnectionInfo, SenderConfig, SenderStats};
use crate::pipeline::{DecodeConfig, EncodeConfig, EncodeStats};

pub mod producer;
pub mod receiver;

pub use producer::ProducerSession;
pub use receiver::ReceiverSession;

// ── Producer ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Announced name. Empty means the host name.
    pub name: String,
    /// Media listener address; port 0 picks a free port.
    pub bind_addr: SocketAddr,
    /// Advertise both audio and video so consumers preroll.
    pub audio_and_video: bool,
    /// Run a discovery announcer.
    pub announce: bool,
    pub discovery: DiscoveryConfig,
    pub encode: EncodeConfig,
    pub sender: SenderConfig,
    pub keep_alive_interval: Duration,
    /// Deadline for a new consumer's options handshake.
    pub handshake_timeout: Duration,
    /// Idle capture buffers kept for reuse.
    pub pool_buffers: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            audio_and_video: true,
            announce: true,
            discovery: DiscoveryConfig::default(),
            encode: EncodeConfig::default(),
            sender: SenderConfig::default(),
            keep_alive_interval: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            pool_buffers: 32,
        }
    }
}

/// Snapshot of a producer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub connections: usize,
    pub encode: EncodeStats,
    pub sender: SenderStats,
}

// ── Receiver ─────────────────────────────────────────────────────

/// Which producer a receiver connects to.
#[derive(Debug, Clone)]
pub enum ReceiverTarget {
    /// A peer-table key (`name:address`), resolved before every dial.
    Discovered { key: String, peers: PeerTable },
    /// A fixed address, with the capability the producer is known to have.
    Direct {
        info: ConnectionInfo,
        audio_and_video: bool,
    },
}

impl std::fmt::Display for ReceiverTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovered { key, .. } => write!(f, "{key}"),
            Self::Direct { info, .. } => write!(f, "{info}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub target: ReceiverTarget,
    /// Quality requested in the handshake.
    pub quality: u8,
    pub dial_timeout: Duration,
    /// Pause after a failed dial or an unresolvable target.
    pub retry_delay: Duration,
    pub decode: DecodeConfig,
}

impl ReceiverConfig {
    pub fn new(target: ReceiverTarget) -> Self {
        Self {
            target,
            quality: 90,
            dial_timeout: Duration::from_millis(100),
            retry_delay: Duration::from_millis(100),
            decode: DecodeConfig::default(),
        }
    }
}
