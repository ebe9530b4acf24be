//! LAN discovery of producers.
//!
//! A producer runs an [`Announcer`] that broadcasts its
//! [`AnnouncePayload`](crate::protocol::AnnouncePayload) as JSON over UDP
//! on a fixed schedule. Consumers run a [`PeerListener`] that collects the
//! announcements into a [`PeerTable`] whose entries expire unless
//! refreshed. There is no acknowledgment and nothing is persisted.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

pub mod announcer;
pub mod listener;
pub mod peers;

pub use announcer::{Announcer, default_name};
pub use listener::PeerListener;
pub use peers::{DEFAULT_PEER_TTL, Peer, PeerTable};

/// Well-known discovery UDP port.
pub const DEFAULT_DISCOVERY_PORT: u16 = 9999;

/// Largest announcement datagram accepted.
pub const MAX_ANNOUNCE_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Where announcements are sent.
    pub announce_addr: IpAddr,
    /// Address the listener binds.
    pub listen_addr: IpAddr,
    pub port: u16,
    pub announce_interval: Duration,
    pub peer_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            announce_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_DISCOVERY_PORT,
            announce_interval: Duration::from_secs(1),
            peer_ttl: DEFAULT_PEER_TTL,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl DiscoveryConfig {
    pub fn announce_target(&self) -> SocketAddr {
        SocketAddr::new(self.announce_addr, self.port)
    }

    pub fn listen_bind(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.port)
    }
}
