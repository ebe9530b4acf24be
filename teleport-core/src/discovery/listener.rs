//! Collects announcements into a [`PeerTable`].

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::discovery::{DiscoveryConfig, MAX_ANNOUNCE_SIZE, PeerTable};
use crate::error::TeleportError;
use crate::protocol::AnnouncePayload;

/// Background receiver and sweeper for a peer table.
#[derive(Debug)]
pub struct PeerListener {
    table: PeerTable,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl PeerListener {
    /// Bind the discovery port and start filling a new table.
    pub async fn start(config: &DiscoveryConfig) -> Result<Self, TeleportError> {
        let bind = config.listen_bind();
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|source| TeleportError::Bind {
                addr: bind.to_string(),
                source,
            })?;
        let local_addr = socket.local_addr()?;
        let table = PeerTable::new(config.peer_ttl);
        let cancel = CancellationToken::new();

        info!(%local_addr, "listening for announcements");
        let receiver = tokio::spawn(receive_loop(socket, table.clone(), cancel.clone()));
        let sweeper = tokio::spawn(sweep_loop(
            table.clone(),
            config.sweep_interval,
            cancel.clone(),
        ));

        Ok(Self {
            table,
            local_addr,
            cancel,
            tasks: vec![receiver, sweeper],
        })
    }

    pub fn table(&self) -> &PeerTable {
        &self.table
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop both tasks and wait for them. The table keeps its contents.
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "discovery task ended abnormally");
            }
        }
    }
}

/// Pause after consecutive receive errors: doubles from `FIRST` up to
/// `MAX`, back to `FIRST` after a good datagram.
#[derive(Debug)]
struct Backoff {
    next: Duration,
}

impl Backoff {
    const FIRST: Duration = Duration::from_millis(10);
    const MAX: Duration = Duration::from_secs(1);

    fn new() -> Self {
        Self { next: Self::FIRST }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(Self::MAX);
        delay
    }

    fn reset(&mut self) {
        self.next = Self::FIRST;
    }
}

async fn receive_loop(socket: UdpSocket, table: PeerTable, cancel: CancellationToken) {
    let mut buf = vec![0u8; MAX_ANNOUNCE_SIZE];
    let mut backoff = Backoff::new();
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            res = socket.recv_from(&mut buf) => res,
        };
        let (n, from) = match received {
            Ok(r) => {
                backoff.reset();
                r
            }
            Err(e) => {
                // e.g. ICMP unreachable surfaced on some platforms.
                let delay = backoff.next_delay();
                debug!(error = %e, ?delay, "discovery receive error");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
        };

        match AnnouncePayload::from_bytes(&buf[..n]) {
            Ok(payload) => {
                let key = table.upsert(payload, from.ip());
                trace!(%key, "peer refreshed");
            }
            Err(e) => debug!(%from, error = %e, "ignoring malformed announcement"),
        }
    }
}

async fn sweep_loop(table: PeerTable, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let removed = table.sweep();
                if removed > 0 {
                    debug!(removed, "expired peers swept");
                }
            }
        }
    }
}
