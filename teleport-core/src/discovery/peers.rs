//! Table of discovered producers with expiring entries.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::network::ConnectionInfo;
use crate::protocol::AnnouncePayload;

/// Reference lifetime of an entry without a refreshing announcement.
pub const DEFAULT_PEER_TTL: Duration = Duration::from_secs(5);

/// One discovered producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// `name:address`, unique per announcing process and host.
    pub key: String,
    pub descriptor: AnnouncePayload,
    pub address: IpAddr,
}

impl Peer {
    pub fn key_for(name: &str, address: IpAddr) -> String {
        format!("{name}:{address}")
    }

    /// Where to open the media connection.
    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo::new(self.address.to_string(), self.descriptor.port)
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} / {}",
            self.descriptor.name,
            self.connection_info()
        )
    }
}

#[derive(Debug, Clone)]
struct Entry {
    descriptor: AnnouncePayload,
    address: IpAddr,
    expires: Instant,
}

/// Shared peer table. Clones refer to the same table.
#[derive(Debug, Clone)]
pub struct PeerTable {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new(DEFAULT_PEER_TTL)
    }
}

impl PeerTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or refresh an entry, expiring `ttl` after now.
    pub fn upsert(&self, descriptor: AnnouncePayload, address: IpAddr) -> String {
        self.upsert_at(descriptor, address, Instant::now())
    }

    /// Insert or refresh an entry as if received at `now`.
    pub fn upsert_at(&self, descriptor: AnnouncePayload, address: IpAddr, now: Instant) -> String {
        let key = Peer::key_for(&descriptor.name, address);
        self.lock().insert(
            key.clone(),
            Entry {
                descriptor,
                address,
                expires: now + self.ttl,
            },
        );
        key
    }

    /// Delete expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires > now);
        before - entries.len()
    }

    pub fn get(&self, key: &str) -> Option<Peer> {
        self.lock().get(key).map(|e| Peer {
            key: key.to_string(),
            descriptor: e.descriptor.clone(),
            address: e.address,
        })
    }

    /// All entries, sorted by key.
    pub fn snapshot(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self
            .lock()
            .iter()
            .map(|(key, e)| Peer {
                key: key.clone(),
                descriptor: e.descriptor.clone(),
                address: e.address,
            })
            .collect();
        peers.sort_by(|a, b| a.key.cmp(&b.key));
        peers
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
