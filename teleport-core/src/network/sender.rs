//! Fan-out dispatcher.
//!
//! Every registered connection owns a bounded delivery queue drained by a
//! dedicated writer task:
//!
//! ```text
//!                    ┌─► [queue] ─► writer task ─► socket A
//!  send(bytes) ──────┼─► [queue] ─► writer task ─► socket B
//!                    └─► [queue] ─► writer task ─► socket C
//! ```
//!
//! The registry lock is held only to snapshot or mutate the connection
//! set, never across a socket write or a queue push. A write failure
//! removes only the failing connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::MediaCodec;
use crate::pipeline::DrainSink;

// ── Config ───────────────────────────────────────────────────────

/// What `send` does when a connection's queue is past the critical depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Skip that connection for this frame. Other connections are never
    /// affected by a slow one.
    #[default]
    Drop,
    /// Wait for queue space. A stalled consumer then holds up delivery to
    /// the connections after it. Only valid from blocking threads.
    Block,
}

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Capacity of each connection's delivery queue.
    pub queue_capacity: usize,
    /// Queue depth that triggers a warning.
    pub high_water: usize,
    /// Queue depth at which [`OverflowPolicy::Drop`] starts dropping.
    pub critical: usize,
    pub policy: OverflowPolicy,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            high_water: 100,
            critical: 800,
            policy: OverflowPolicy::Drop,
        }
    }
}

/// Counters of the sender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// Frames queued to a connection (one per connection per frame).
    pub sent: u64,
    /// Frames skipped for a connection because its queue was saturated.
    pub dropped: u64,
    /// Connections removed after a write failure.
    pub disconnected: u64,
}

/// Registry key of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ── Sender ───────────────────────────────────────────────────────

struct Entry {
    peer: Arc<str>,
    tx: mpsc::Sender<Bytes>,
    above_high: Arc<AtomicBool>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    config: SenderConfig,
    registry: Mutex<HashMap<ConnectionId, Entry>>,
    next_id: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
    disconnected: AtomicU64,
}

/// Fan-out of serialized frames to every connected consumer.
#[derive(Clone)]
pub struct Sender {
    inner: Arc<Inner>,
}

impl Sender {
    pub fn new(config: SenderConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                sent: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                disconnected: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SenderConfig {
        &self.inner.config
    }

    /// Register a connection and spawn its writer task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn add_connection<W>(&self, writer: W, peer: impl Into<String>) -> ConnectionId
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let peer: Arc<str> = Arc::from(peer.into());
        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity.max(1));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(write_loop(
            Arc::downgrade(&self.inner),
            id,
            Arc::clone(&peer),
            writer,
            rx,
            cancel.clone(),
        ));

        info!(%id, peer = %peer, "consumer connected");
        self.inner.lock_registry().insert(
            id,
            Entry {
                peer,
                tx,
                above_high: Arc::new(AtomicBool::new(false)),
                cancel,
                handle,
            },
        );
        id
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock_registry().len()
    }

    /// Peer labels of the registered connections, sorted by id.
    pub fn connections(&self) -> Vec<(ConnectionId, String)> {
        let mut list: Vec<_> = self
            .inner
            .lock_registry()
            .iter()
            .map(|(id, e)| (*id, e.peer.to_string()))
            .collect();
        list.sort();
        list
    }

    /// Queue the same frame to every connection, applying the configured
    /// overflow policy.
    pub fn send(&self, frame: Bytes) {
        self.dispatch(frame, self.inner.config.policy);
    }

    /// Queue a frame without ever waiting, whatever the policy. Used for
    /// expendable traffic such as keep-alives.
    pub fn send_lossy(&self, frame: Bytes) {
        self.dispatch(frame, OverflowPolicy::Drop);
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            sent: self.inner.sent.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            disconnected: self.inner.disconnected.load(Ordering::Relaxed),
        }
    }

    /// Close every connection, discard whatever is queued and wait for all
    /// writer tasks to exit.
    pub async fn close_all(&self) {
        let entries: Vec<(ConnectionId, Entry)> = self.inner.lock_registry().drain().collect();
        if entries.is_empty() {
            return;
        }

        let mut handles = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            entry.cancel.cancel();
            handles.push((id, entry.handle));
        }
        for (id, handle) in handles {
            if let Err(e) = handle.await {
                warn!(%id, error = %e, "writer task ended abnormally");
            }
        }
        debug!("all consumer connections closed");
    }

    fn dispatch(&self, frame: Bytes, policy: OverflowPolicy) {
        let targets: Vec<_> = self
            .inner
            .lock_registry()
            .iter()
            .map(|(id, e)| (*id, e.tx.clone(), Arc::clone(&e.above_high)))
            .collect();

        let cfg = &self.inner.config;
        for (id, tx, above_high) in targets {
            let depth = tx.max_capacity() - tx.capacity();

            if depth > cfg.high_water {
                if !above_high.swap(true, Ordering::Relaxed) {
                    warn!(%id, depth, "send queue high");
                }
            } else if above_high.swap(false, Ordering::Relaxed) {
                debug!(%id, depth, "send queue recovered");
            }

            let queued = match policy {
                OverflowPolicy::Drop if depth > cfg.critical => {
                    debug!(%id, depth, "send queue exceeded, frame dropped");
                    false
                }
                OverflowPolicy::Drop => match tx.try_send(frame.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => false,
                    // Writer already gone; it removes itself.
                    Err(TrySendError::Closed(_)) => continue,
                },
                OverflowPolicy::Block => {
                    if tx.blocking_send(frame.clone()).is_err() {
                        continue;
                    }
                    true
                }
            };

            let counter = if queued {
                &self.inner.sent
            } else {
                &self.inner.dropped
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl DrainSink for Sender {
    fn deliver(&self, frame: Bytes) {
        self.send(frame);
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("connections", &self.connection_count())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Inner {
    fn lock_registry(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, Entry>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Writer task ──────────────────────────────────────────────────

async fn write_loop<W>(
    inner: Weak<Inner>,
    id: ConnectionId,
    peer: Arc<str>,
    writer: W,
    mut rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut framed = FramedWrite::new(writer, MediaCodec::new());

    let failed = loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break false,
            next = rx.recv() => match next {
                Some(frame) => frame,
                None => break false,
            },
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break false,
            result = framed.send(frame) => result,
        };
        if let Err(e) = result {
            warn!(%id, peer = %peer, error = %e, "write failed, dropping consumer");
            break true;
        }
    };

    rx.close();
    if failed {
        if let Some(inner) = inner.upgrade() {
            if inner.lock_registry().remove(&id).is_some() {
                inner.disconnected.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    debug!(%id, "writer task exited");
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::WaveHeader;
    use crate::packet::Packet;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio_util::codec::FramedRead;

    fn frame(ts: u64) -> Bytes {
        let wave = WaveHeader {
            sample_format: 1,
            sample_rate: 8000,
            channels: 1,
            frames: 64,
        };
        Packet::audio(ts, wave, vec![0u8; 64]).to_bytes().unwrap()
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn stalled_consumer_does_not_affect_others() {
        let sender = Sender::new(SenderConfig {
            queue_capacity: 4,
            high_water: 2,
            critical: 3,
            policy: OverflowPolicy::Drop,
        });

        // X is never read; its duplex buffer fills after one frame.
        let (x_write, _x_read) = tokio::io::duplex(128);
        let (y_write, y_read) = tokio::io::duplex(64 * 1024);
        sender.add_connection(x_write, "x");
        sender.add_connection(y_write, "y");
        let mut y = FramedRead::new(y_read, MediaCodec::new());

        for ts in 0..50u64 {
            sender.send(frame(ts));
            let got = tokio::time::timeout(Duration::from_secs(5), y.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert_eq!(got.timestamp(), ts);
        }

        let stats = sender.stats();
        assert!(stats.dropped > 0);
        assert_eq!(stats.disconnected, 0);
        assert_eq!(sender.connection_count(), 2);

        sender.close_all().await;
        assert_eq!(sender.connection_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_policy_delivers_everything_once_drained() {
        let sender = Sender::new(SenderConfig {
            queue_capacity: 2,
            high_water: 1,
            critical: 2,
            policy: OverflowPolicy::Block,
        });

        let (x_write, x_read) = tokio::io::duplex(128);
        let (y_write, y_read) = tokio::io::duplex(64 * 1024);
        sender.add_connection(x_write, "x");
        sender.add_connection(y_write, "y");

        let producer = {
            let sender = sender.clone();
            tokio::task::spawn_blocking(move || {
                for ts in 0..20u64 {
                    sender.send(frame(ts));
                }
            })
        };

        // Let the producer stall on X before anyone reads it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());

        let read_all = |r: tokio::io::DuplexStream| async move {
            let mut framed = FramedRead::new(r, MediaCodec::new());
            let mut seen = Vec::new();
            while seen.len() < 20 {
                seen.push(framed.next().await.unwrap().unwrap().timestamp());
            }
            seen
        };
        let (xs, ys) = tokio::join!(read_all(x_read), read_all(y_read));
        producer.await.unwrap();

        let expected: Vec<u64> = (0..20).collect();
        assert_eq!(xs, expected);
        assert_eq!(ys, expected);
        assert_eq!(sender.stats().dropped, 0);
        sender.close_all().await;
    }

    #[tokio::test]
    async fn write_failure_removes_only_that_connection() {
        let sender = Sender::new(SenderConfig::default());

        let broken = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let (ok_write, ok_read) = tokio::io::duplex(64 * 1024);
        sender.add_connection(broken, "broken");
        sender.add_connection(ok_write, "ok");

        sender.send(frame(7));
        wait_for(|| sender.connection_count() == 1).await;

        let mut ok = FramedRead::new(ok_read, MediaCodec::new());
        assert_eq!(ok.next().await.unwrap().unwrap().timestamp(), 7);
        assert_eq!(sender.stats().disconnected, 1);
        assert_eq!(sender.connections()[0].1, "ok");

        sender.close_all().await;
    }

    #[tokio::test]
    async fn close_all_joins_stalled_writers() {
        let sender = Sender::new(SenderConfig::default());
        let (x_write, _x_read) = tokio::io::duplex(16);
        sender.add_connection(x_write, "x");
        for ts in 0..10 {
            sender.send(frame(ts));
        }

        tokio::time::timeout(Duration::from_secs(5), sender.close_all())
            .await
            .expect("close_all hung on a stalled writer");
        assert_eq!(sender.connection_count(), 0);

        // Sending with no connections is a no-op.
        sender.send(frame(99));
        assert_eq!(sender.stats().sent, 10);
    }
}
