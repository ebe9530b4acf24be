//! Receiver session: dial loop, decode pipeline and host output.
//!
//! The dial loop resolves the target, connects with a short deadline
//! (`Dialing`), sends the options handshake (`Handshaking`) and feeds every
//! packet into the
//! [`DecodePipeline`]. Any failure is transient: the pipeline is reset
//! (the host blanks its output) and the loop dials again.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TeleportError;
use crate::host::FrameSink;
use crate::media::ImageCodec;
use crate::network::{ConnectionInfo, MediaStream};
use crate::pipeline::{DecodePipeline, DecodeStats};
use crate::protocol::StreamOptions;
use crate::session::{ReceiverConfig, ReceiverTarget};
use crate::state::LinkPhase;

/// A running receiver.
#[derive(Debug)]
pub struct ReceiverSession {
    pipeline: DecodePipeline,
    phase: Arc<Mutex<LinkPhase>>,
    connections: Arc<std::sync::atomic::AtomicU64>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ReceiverSession {
    /// Start dialing `config.target`. Never fails: an unreachable
    /// producer is retried until [`stop`](Self::stop).
    pub fn start(
        config: ReceiverConfig,
        codec: Arc<dyn ImageCodec>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        let expect_both = match &config.target {
            ReceiverTarget::Direct {
                audio_and_video, ..
            } => *audio_and_video,
            ReceiverTarget::Discovered { .. } => true,
        };
        let pipeline = DecodePipeline::new(config.decode.clone(), codec, sink, expect_both);
        let phase = Arc::new(Mutex::new(LinkPhase::default()));
        let connections = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let cancel = CancellationToken::new();

        info!(target = %config.target, "receiver started");
        let handle = tokio::spawn(
            DialLoop {
                config,
                pipeline: pipeline.clone(),
                phase: Arc::clone(&phase),
                connections: Arc::clone(&connections),
                cancel: cancel.clone(),
            }
            .run(),
        );

        Self {
            pipeline,
            phase,
            connections,
            cancel,
            handle,
        }
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Connections established so far, including the current one.
    pub fn connections(&self) -> u64 {
        self.connections.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn stats(&self) -> DecodeStats {
        self.pipeline.stats()
    }

    /// Close the connection, wait for the dial loop and every decode
    /// worker to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "receiver task ended abnormally");
        }
        self.pipeline.close();
        self.pipeline.wait_idle().await;
        info!("receiver stopped");
    }
}

// ── Dial loop ────────────────────────────────────────────────────

struct DialLoop {
    config: ReceiverConfig,
    pipeline: DecodePipeline,
    phase: Arc<Mutex<LinkPhase>>,
    connections: Arc<std::sync::atomic::AtomicU64>,
    cancel: CancellationToken,
}

impl DialLoop {
    async fn run(self) {
        let options = StreamOptions::new(self.config.quality);

        while !self.cancel.is_cancelled() {
            let Some((info, expect_both)) = self.resolve() else {
                self.pause().await;
                continue;
            };
            if let Err(e) = self.pipeline.set_expect_both(expect_both) {
                debug!(error = %e, "capability unchanged");
            }

            let dialed = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = self.dial(&info) => res,
            };
            let mut stream = match dialed {
                Ok(stream) => stream,
                Err(e) => {
                    self.transition_to_disconnected();
                    debug!(peer = %info, error = %e, "dial failed");
                    // A timed-out dial already waited long enough.
                    if !matches!(e, TeleportError::Timeout(_)) {
                        self.pause().await;
                    }
                    continue;
                }
            };

            let handshaken = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = self.handshake(&mut stream, &options) => res,
            };
            if let Err(e) = handshaken {
                self.transition_to_disconnected();
                warn!(peer = %info, error = %e, "handshake failed");
                self.pause().await;
                continue;
            }
            self.connections
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            info!(peer = %info, "connected to producer");

            let stopped = self.stream_packets(&mut stream).await;

            drop(stream);
            self.transition_to_disconnected();
            self.pipeline.reset();
            if stopped {
                break;
            }
        }
        self.transition_to_disconnected();
    }

    /// `Dialing` until the TCP connection is up, then `Handshaking`.
    async fn dial(&self, info: &ConnectionInfo) -> Result<MediaStream, TeleportError> {
        self.transition(LinkPhase::begin_dial);
        let stream = MediaStream::dial(info, self.config.dial_timeout).await?;
        self.transition(LinkPhase::begin_handshake);
        Ok(stream)
    }

    async fn handshake(
        &self,
        stream: &mut MediaStream,
        options: &StreamOptions,
    ) -> Result<(), TeleportError> {
        let deadline = self.config.dial_timeout;
        tokio::time::timeout(deadline, stream.handshake(options))
            .await
            .map_err(|_| TeleportError::Timeout(deadline))??;
        self.transition(LinkPhase::begin_streaming);
        Ok(())
    }

    /// Pump packets into the pipeline. Returns `true` when the session is
    /// stopping.
    async fn stream_packets(&self, stream: &mut MediaStream) -> bool {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return true,
                next = stream.next_packet() => next,
            };
            match next {
                Ok(Some(packet)) => {
                    if let Err(TeleportError::Stopped) = self.pipeline.push(packet) {
                        return true;
                    }
                }
                Ok(None) => {
                    info!(peer = %stream.peer(), "producer closed the stream");
                    return false;
                }
                Err(e) => {
                    warn!(peer = %stream.peer(), error = %e, "stream failed, reconnecting");
                    return false;
                }
            }
        }
    }

    fn resolve(&self) -> Option<(ConnectionInfo, bool)> {
        match &self.config.target {
            ReceiverTarget::Direct {
                info,
                audio_and_video,
            } => Some((info.clone(), *audio_and_video)),
            ReceiverTarget::Discovered { key, peers } => peers
                .get(key)
                .map(|p| (p.connection_info(), p.descriptor.audio_and_video)),
        }
    }

    async fn pause(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.retry_delay) => {}
        }
    }

    fn transition(&self, step: fn(&mut LinkPhase) -> Result<(), TeleportError>) {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = step(&mut phase) {
            debug!(phase = %*phase, error = %e, "unexpected link transition");
        }
    }

    fn transition_to_disconnected(&self) {
        self.phase
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .disconnect();
    }
}

// ── Tests ────────────────────────────────────────────────────────
