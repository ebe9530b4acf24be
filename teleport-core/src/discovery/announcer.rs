//! Periodic self-announcement.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discovery::DiscoveryConfig;
use crate::error::TeleportError;
use crate::protocol::AnnouncePayload;

/// Name announced when none is configured: the host name, else `(None)`.
pub fn default_name() -> String {
    let from_env = ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty());

    from_env
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| "(None)".to_string())
}

/// Broadcasts a descriptor until stopped.
///
/// The descriptor is re-read on every tick, so updates take effect with
/// the next announcement.
#[derive(Debug)]
pub struct Announcer {
    payload: watch::Sender<AnnouncePayload>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Announcer {
    /// Bind a broadcast-capable socket and start announcing. An empty name
    /// in `payload` is replaced by [`default_name`].
    pub async fn start(
        config: &DiscoveryConfig,
        mut payload: AnnouncePayload,
    ) -> Result<Self, TeleportError> {
        if payload.name.trim().is_empty() {
            payload.name = default_name();
        }

        let target = config.announce_target();
        let bind_ip = match target.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
        };
        let socket = UdpSocket::bind(SocketAddr::new(bind_ip, 0)).await?;
        socket.set_broadcast(true)?;

        // Fail at start rather than on the first tick.
        payload.to_bytes()?;
        let cancel = CancellationToken::new();
        let interval = config.announce_interval;

        info!(name = %payload.name, port = payload.port, %target, "announcing");
        let (tx, rx) = watch::channel(payload);
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let bytes = match rx.borrow().to_bytes() {
                                Ok(bytes) => bytes,
                                Err(e) => {
                                    warn!(error = %e, "cannot encode announcement");
                                    continue;
                                }
                            };
                            if let Err(e) = socket.send_to(&bytes, target).await {
                                warn!(%target, error = %e, "announce failed");
                            }
                        }
                    }
                }
                debug!("announcer stopped");
            }
        });

        Ok(Self {
            payload: tx,
            cancel,
            handle,
        })
    }

    /// The descriptor being announced, after name defaulting.
    pub fn payload(&self) -> AnnouncePayload {
        self.payload.borrow().clone()
    }

    /// Change the advertised audio+video capability.
    pub fn set_audio_and_video(&self, audio_and_video: bool) {
        self.payload.send_if_modified(|p| {
            let changed = p.audio_and_video != audio_and_video;
            p.audio_and_video = audio_and_video;
            changed
        });
    }

    /// Stop announcing and wait for the broadcast task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "announcer task ended abnormally");
        }
    }
}
