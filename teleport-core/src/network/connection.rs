//! Consumer side of a media connection.
//!
//! [`MediaStream::dial`] opens the TCP connection with a deadline,
//! [`MediaStream::handshake`] sends the options record, and the stream then
//! yields decoded [`Packet`]s until it ends or violates the protocol.

use std::net::SocketAddr;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;

use crate::codec::MediaCodec;
use crate::error::TeleportError;
use crate::packet::Packet;
use crate::protocol::{StreamOptions, write_handshake};

/// Address of a producer's media port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionInfo {
    host: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl From<SocketAddr> for ConnectionInfo {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl std::fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A media connection to one producer.
#[derive(Debug)]
pub struct MediaStream {
    peer: ConnectionInfo,
    reader: FramedRead<TcpStream, MediaCodec>,
}

impl MediaStream {
    /// Open a TCP connection to `info` within `timeout`. Nothing is sent.
    pub async fn dial(info: &ConnectionInfo, timeout: Duration) -> Result<Self, TeleportError> {
        let addr = info.to_string();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| TeleportError::Timeout(timeout))??;
        stream.set_nodelay(true)?;

        Ok(Self {
            peer: info.clone(),
            reader: FramedRead::new(stream, MediaCodec::new()),
        })
    }

    /// Send the options handshake. The producer starts streaming once it
    /// has read it.
    pub async fn handshake(&mut self, options: &StreamOptions) -> Result<(), TeleportError> {
        write_handshake(self.reader.get_mut(), options).await
    }

    pub fn peer(&self) -> &ConnectionInfo {
        &self.peer
    }

    /// Next packet from the producer. `Ok(None)` on orderly close.
    pub async fn next_packet(&mut self) -> Result<Option<Packet>, TeleportError> {
        self.reader.next().await.transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::read_handshake;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn display_brackets_ipv6() {
        assert_eq!(ConnectionInfo::new("10.0.0.2", 9000).to_string(), "10.0.0.2:9000");
        assert_eq!(ConnectionInfo::new("::1", 9000).to_string(), "[::1]:9000");
    }

    #[tokio::test]
    async fn handshake_is_sent_only_when_asked_then_packets_flow() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let info = ConnectionInfo::from(listener.local_addr().unwrap());
        let (dialed_tx, dialed_rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // Nothing arrives between dial and handshake.
            let mut byte = [0u8; 1];
            let early =
                tokio::time::timeout(Duration::from_millis(50), sock.read(&mut byte)).await;
            assert!(early.is_err(), "bytes sent before the handshake");
            dialed_tx.send(()).unwrap();

            let opts = read_handshake(&mut sock).await.unwrap();
            let bytes = Packet::keep_alive().to_bytes().unwrap();
            sock.write_all(&bytes).await.unwrap();
            opts
        });

        let mut stream = MediaStream::dial(&info, Duration::from_secs(1))
            .await
            .unwrap();
        dialed_rx.await.unwrap();
        stream.handshake(&StreamOptions::new(33)).await.unwrap();

        let packet = stream.next_packet().await.unwrap().unwrap();
        assert_eq!(packet, Packet::keep_alive());
        assert_eq!(server.await.unwrap().quality_level(), 33);
        assert!(stream.next_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refused_dial_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let info = ConnectionInfo::from(listener.local_addr().unwrap());
        drop(listener);
        assert!(
            MediaStream::dial(&info, Duration::from_millis(100))
                .await
                .is_err()
        );
    }
}
