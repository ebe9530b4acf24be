//! Node run modes.
//!
//! Each mode owns one core session and runs until its stop token is
//! cancelled, logging counters on the configured interval. Stopping joins
//! the session before returning.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use teleport_core::{
    ConnectionInfo, PeerListener, PeerTable, ProducerSession, ReceiverSession, ReceiverTarget,
    TeleportError, ZstdImageCodec,
};

use crate::config::NodeConfig;
use crate::pattern::TestPattern;
use crate::stats::StatsSink;

/// How a receiver picks its producer.
#[derive(Debug, Clone)]
pub enum Target {
    /// Fixed `host:port`.
    Address(ConnectionInfo),
    /// Peer key (`name:address`) or bare announced name, resolved through
    /// discovery.
    Peer(String),
}

// ── NodeService ──────────────────────────────────────────────────

/// The top-level node.
pub struct NodeService {
    config: NodeConfig,
    stop: CancellationToken,
}

impl NodeService {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            stop: CancellationToken::new(),
        }
    }

    /// Token that ends the running mode when cancelled.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Produce the test pattern and serve it to every consumer.
    pub async fn serve(&self) -> Result<(), TeleportError> {
        let producer_cfg = self.config.to_producer_config();
        let producer = ProducerSession::start(producer_cfg, Arc::new(ZstdImageCodec::new())).await?;
        info!(
            addr = %producer.local_addr(),
            name = producer.announced_name().as_deref().unwrap_or("-"),
            "serving test pattern"
        );

        let stream = &self.config.stream;
        let source = TestPattern::new(
            stream.width,
            stream.height,
            stream.fps,
            stream.sample_rate,
            stream.audio_and_video,
            Arc::clone(producer.pool()),
        );
        let pump = producer.spawn_source(source);

        let mut ticker = self.stats_ticker();
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {
                    let stats = producer.stats();
                    info!(
                        connections = stats.connections,
                        submitted = stats.encode.submitted,
                        delivered = stats.encode.delivered,
                        dropped = stats.encode.dropped + stats.sender.dropped,
                        lagged = stats.encode.lagged,
                        "producer"
                    );
                }
            }
        }

        producer.stop().await;
        if let Err(e) = pump.await {
            warn!(error = %e, "frame pump ended abnormally");
        }
        Ok(())
    }

    /// Receive from `target` until stopped.
    pub async fn receive(&self, target: Target) -> Result<(), TeleportError> {
        let mut listener = None;
        let target = match target {
            Target::Address(info) => ReceiverTarget::Direct {
                info,
                audio_and_video: self.config.stream.audio_and_video,
            },
            Target::Peer(name) => {
                let l = PeerListener::start(&self.config.to_discovery_config()).await?;
                let peers = l.table().clone();
                listener = Some(l);
                let key = tokio::select! {
                    _ = self.stop.cancelled() => return Ok(()),
                    key = resolve_peer(&peers, &name) => key,
                };
                ReceiverTarget::Discovered { key, peers }
            }
        };

        let sink = Arc::new(StatsSink::new());
        let receiver = ReceiverSession::start(
            self.config.to_receiver_config(target),
            Arc::new(ZstdImageCodec::new()),
            Arc::clone(&sink) as Arc<dyn teleport_core::FrameSink>,
        );

        let mut ticker = self.stats_ticker();
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {
                    let decode = receiver.stats();
                    let shown = sink.stats();
                    info!(
                        phase = %receiver.phase(),
                        video = shown.video,
                        audio = shown.audio,
                        position_ms = shown.position / 1_000_000,
                        corrupt = decode.corrupt,
                        late = decode.late,
                        dropped = decode.dropped,
                        "receiver"
                    );
                }
            }
        }

        receiver.stop().await;
        if let Some(l) = listener {
            l.stop().await;
        }
        Ok(())
    }

    /// Print every producer seen on the LAN until stopped.
    pub async fn discover(&self) -> Result<(), TeleportError> {
        let listener = PeerListener::start(&self.config.to_discovery_config()).await?;
        info!(addr = %listener.local_addr(), "listening for producers");

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut last = Vec::new();
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {
                    let peers = listener.table().snapshot();
                    let keys: Vec<String> = peers.iter().map(|p| p.key.clone()).collect();
                    if keys != last {
                        for peer in &peers {
                            println!("{}\t{}", peer.key, peer);
                        }
                        if peers.is_empty() {
                            println!("(no producers)");
                        }
                        last = keys;
                    }
                }
            }
        }

        listener.stop().await;
        Ok(())
    }

    fn stats_ticker(&self) -> tokio::time::Interval {
        let secs = self.config.logging.stats_interval_secs;
        // Zero disables the periodic line; an hour-long tick is close enough.
        let every = if secs == 0 {
            Duration::from_secs(3600)
        } else {
            Duration::from_secs(secs)
        };
        tokio::time::interval_at(tokio::time::Instant::now() + every, every)
    }
}

/// Wait until `wanted` appears in the table, matching either the full key
/// or the announced name.
async fn resolve_peer(peers: &PeerTable, wanted: &str) -> String {
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut logged = false;
    loop {
        ticker.tick().await;
        if let Some(peer) = peers
            .snapshot()
            .into_iter()
            .find(|p| p.key == wanted || p.descriptor.name == wanted)
        {
            info!(peer = %peer, "producer found");
            return peer.key;
        }
        if !logged {
            info!(wanted, "waiting for producer announcement");
            logged = true;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
