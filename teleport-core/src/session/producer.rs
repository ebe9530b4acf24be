//! Producer session: listener, encode pipeline, fan-out and announcer.
//!
//! ```text
//!  FrameSource ─► submit ─► EncodePipeline ─► Sender ─► consumers
//!                                               ▲
//!  TcpListener ─► handshake (OPTS) ─────────────┘ add_connection
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::discovery::Announcer;
use crate::error::TeleportError;
use crate::host::{FrameSource, MediaFrame};
use crate::media::{AudioFrame, BufferPool, ImageCodec, VideoFrame};
use crate::network::Sender;
use crate::packet::Packet;
use crate::pipeline::EncodePipeline;
use crate::protocol::{AnnouncePayload, read_handshake};
use crate::session::{ProducerConfig, ProducerStats};

/// A running producer.
#[derive(Debug)]
pub struct ProducerSession {
    local_addr: SocketAddr,
    pipeline: EncodePipeline,
    sender: Sender,
    pool: Arc<BufferPool>,
    announcer: Option<Announcer>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl ProducerSession {
    /// Bind the media listener and start accepting consumers.
    ///
    /// A bind failure is returned to the caller and not retried.
    pub async fn start(
        config: ProducerConfig,
        codec: Arc<dyn ImageCodec>,
    ) -> Result<Self, TeleportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| TeleportError::Bind {
                addr: config.bind_addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let pool = Arc::new(BufferPool::new(config.pool_buffers));
        let sender = Sender::new(config.sender.clone());
        let pipeline = EncodePipeline::new(
            config.encode.clone(),
            codec,
            Arc::clone(&pool),
            Arc::new(sender.clone()),
        );

        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();

        tasks.spawn(accept_loop(
            listener,
            sender.clone(),
            pipeline.clone(),
            config.handshake_timeout,
            cancel.clone(),
            tasks.clone(),
        ));
        tasks.spawn(keep_alive_loop(
            sender.clone(),
            config.keep_alive_interval,
            cancel.clone(),
        ));

        let announcer = if config.announce {
            let payload =
                AnnouncePayload::new(config.name.clone(), local_addr.port(), config.audio_and_video);
            match Announcer::start(&config.discovery, payload).await {
                Ok(a) => Some(a),
                Err(e) => {
                    // The stream still works for consumers given the address.
                    warn!(error = %e, "discovery announcer unavailable");
                    None
                }
            }
        } else {
            None
        };

        info!(%local_addr, "producer started");
        Ok(Self {
            local_addr,
            pipeline,
            sender,
            pool,
            announcer,
            cancel,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Name being announced, if discovery is running.
    pub fn announced_name(&self) -> Option<String> {
        self.announcer.as_ref().map(|a| a.payload().name)
    }

    /// Audio+video capability being announced, if discovery is running.
    pub fn announced_audio_and_video(&self) -> Option<bool> {
        self.announcer.as_ref().map(|a| a.payload().audio_and_video)
    }

    pub fn connection_count(&self) -> usize {
        self.sender.connection_count()
    }

    /// Buffers for building [`Image`](crate::media::Image)s; recycled
    /// after compression.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn stats(&self) -> ProducerStats {
        ProducerStats {
            connections: self.sender.connection_count(),
            encode: self.pipeline.stats(),
            sender: self.sender.stats(),
        }
    }

    /// Submit a captured video frame. Returns `false` when it was skipped
    /// because nobody is connected.
    pub fn submit_video(&self, frame: VideoFrame) -> Result<bool, TeleportError> {
        if self.sender.connection_count() == 0 {
            self.pool.release(frame.image.into_data());
            return Ok(false);
        }
        self.pipeline.submit_video(frame)?;
        Ok(true)
    }

    /// Submit a captured audio block. Returns `false` when skipped.
    pub fn submit_audio(&self, frame: AudioFrame) -> Result<bool, TeleportError> {
        if self.sender.connection_count() == 0 {
            return Ok(false);
        }
        self.pipeline.submit_audio(frame)?;
        Ok(true)
    }

    pub fn submit(&self, frame: MediaFrame) -> Result<bool, TeleportError> {
        match frame {
            MediaFrame::Video(v) => self.submit_video(v),
            MediaFrame::Audio(a) => self.submit_audio(a),
        }
    }

    /// Pull frames from `source` until it is exhausted or the session
    /// stops. The announced capability follows the source from here on.
    pub fn spawn_source<S>(&self, mut source: S) -> JoinHandle<()>
    where
        S: FrameSource + 'static,
    {
        if let Some(announcer) = &self.announcer {
            announcer.set_audio_and_video(source.audio_and_video());
        }

        let pipeline = self.pipeline.clone();
        let sender = self.sender.clone();
        let pool = Arc::clone(&self.pool);
        let cancel = self.cancel.clone();

        self.tasks.spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = source.next_frame() => match next {
                        Some(frame) => frame,
                        None => {
                            debug!("frame source exhausted");
                            break;
                        }
                    },
                };

                if sender.connection_count() == 0 {
                    if let MediaFrame::Video(v) = frame {
                        pool.release(v.image.into_data());
                    }
                    continue;
                }

                let submitted = match frame {
                    MediaFrame::Video(v) => pipeline.submit_video(v),
                    MediaFrame::Audio(a) => pipeline.submit_audio(a),
                };
                match submitted {
                    Ok(()) => {}
                    Err(TeleportError::Stopped) => break,
                    Err(e) => warn!(error = %e, "frame rejected"),
                }
            }
        })
    }

    /// Shut down: stop accepting frames and consumers, let in-flight
    /// transforms finish, close every connection, stop announcing and join
    /// all tasks.
    pub async fn stop(self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        self.pipeline.close();
        self.pipeline.wait_idle().await;

        self.sender.close_all().await;

        if let Some(announcer) = self.announcer {
            announcer.stop().await;
        }
        info!(local_addr = %self.local_addr, "producer stopped");
    }
}

// ── Background tasks ─────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    sender: Sender,
    pipeline: EncodePipeline,
    handshake_timeout: std::time::Duration,
    cancel: CancellationToken,
    tasks: TaskTracker,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            res = listener.accept() => match res {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "accept failed, no longer accepting consumers");
                    break;
                }
            },
        };

        tasks.spawn(admit(
            stream,
            peer,
            sender.clone(),
            pipeline.clone(),
            handshake_timeout,
            cancel.clone(),
        ));
    }
}

/// Read the options handshake and register the connection.
async fn admit(
    mut stream: TcpStream,
    peer: SocketAddr,
    sender: Sender,
    pipeline: EncodePipeline,
    handshake_timeout: std::time::Duration,
    cancel: CancellationToken,
) {
    let handshake = tokio::select! {
        _ = cancel.cancelled() => return,
        res = tokio::time::timeout(handshake_timeout, read_handshake(&mut stream)) => res,
    };

    let options = match handshake {
        Ok(Ok(options)) => options,
        Ok(Err(e)) => {
            warn!(%peer, error = %e, "handshake rejected");
            return;
        }
        Err(_) => {
            warn!(%peer, "handshake timed out");
            return;
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "set_nodelay failed");
    }
    pipeline.set_quality(options.quality_level());
    info!(%peer, quality = options.quality_level(), "handshake complete");
    sender.add_connection(stream, peer.to_string());
}

async fn keep_alive_loop(sender: Sender, every: std::time::Duration, cancel: CancellationToken) {
    let frame = match Packet::keep_alive().to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "cannot build keep-alive");
            return;
        }
    };

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if sender.connection_count() > 0 {
                    sender.send_lossy(frame.clone());
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveryConfig;
    use crate::header::ImageHeader;
    use crate::media::{Image, PixelLayout, ZstdImageCodec};
    use crate::network::{ConnectionInfo, MediaStream};
    use crate::protocol::StreamOptions;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn local_config() -> ProducerConfig {
        ProducerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            announce: false,
            ..ProducerConfig::default()
        }
    }

    fn video(ts: u64) -> VideoFrame {
        VideoFrame {
            timestamp: ts,
            image: Image::new(4, 4, PixelLayout::I420, vec![9; 24]).unwrap(),
            color: ImageHeader::default(),
        }
    }

    async fn connect(info: &ConnectionInfo, options: &StreamOptions) -> MediaStream {
        let mut stream = MediaStream::dial(info, Duration::from_secs(1)).await.unwrap();
        stream.handshake(options).await.unwrap();
        stream
    }

    struct VideoOnly;

    #[async_trait::async_trait]
    impl FrameSource for VideoOnly {
        async fn next_frame(&mut self) -> Option<MediaFrame> {
            None
        }

        fn audio_and_video(&self) -> bool {
            false
        }
    }

    async fn wait_for_connections(p: &ProducerSession, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while p.connection_count() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ProducerConfig {
            bind_addr: taken.local_addr().unwrap(),
            ..local_config()
        };
        let err = ProducerSession::start(config, Arc::new(ZstdImageCodec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, TeleportError::Bind { .. }));
    }

    #[tokio::test]
    async fn frames_are_skipped_without_consumers() {
        let p = ProducerSession::start(local_config(), Arc::new(ZstdImageCodec::new()))
            .await
            .unwrap();
        assert!(!p.submit_video(video(0)).unwrap());
        assert_eq!(p.stats().encode.submitted, 0);
        p.stop().await;
    }

    #[tokio::test]
    async fn handshake_sets_quality_and_registers_consumer() {
        let p = ProducerSession::start(local_config(), Arc::new(ZstdImageCodec::new()))
            .await
            .unwrap();
        let info = ConnectionInfo::from(p.local_addr());

        let mut stream = connect(&info, &StreamOptions::new(55)).await;
        wait_for_connections(&p, 1).await;
        assert_eq!(p.pipeline.quality(), 55);

        assert!(p.submit_video(video(123)).unwrap());
        let packet = stream.next_packet().await.unwrap().unwrap();
        assert_eq!(packet.timestamp(), 123);

        p.stop().await;
        assert!(stream.next_packet().await.map(|p| p.is_none()).unwrap_or(true));
    }

    #[tokio::test]
    async fn bad_handshake_closes_only_that_connection() {
        let p = ProducerSession::start(local_config(), Arc::new(ZstdImageCodec::new()))
            .await
            .unwrap();

        let mut bad = TcpStream::connect(p.local_addr()).await.unwrap();
        bad.write_all(b"HTTP/1.1 GET /\r\n\r\n").await.unwrap();

        let info = ConnectionInfo::from(p.local_addr());
        let _good = connect(&info, &StreamOptions::default()).await;

        wait_for_connections(&p, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(p.connection_count(), 1);
        p.stop().await;
    }

    #[tokio::test]
    async fn source_capability_replaces_configured_one() {
        let config = ProducerConfig {
            name: "cam".into(),
            announce: true,
            audio_and_video: true,
            discovery: DiscoveryConfig {
                announce_addr: "127.0.0.1".parse().unwrap(),
                port: 9,
                ..DiscoveryConfig::default()
            },
            ..local_config()
        };
        let p = ProducerSession::start(config, Arc::new(ZstdImageCodec::new()))
            .await
            .unwrap();
        assert_eq!(p.announced_audio_and_video(), Some(true));

        let pump = p.spawn_source(VideoOnly);
        assert_eq!(p.announced_audio_and_video(), Some(false));
        assert_eq!(p.announced_name().as_deref(), Some("cam"));

        pump.await.unwrap();
        p.stop().await;
    }
}
