//! Options handshake sent by the consumer right after connecting.
//!
//! ```text
//! Consumer ──[OPTS | size i32 | {"Quality":90}]──► Producer
//! Producer ──[JPEG/WAVE frames …]────────────────► Consumer   (until disconnect)
//! ```

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TeleportError;
use crate::header::OptionsHeader;

/// Largest options body accepted from a peer.
pub const MAX_OPTIONS_SIZE: usize = 64 * 1024;

/// Stream parameters requested by the consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct StreamOptions {
    /// Requested compression quality, 0..=100.
    pub quality: i32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self { quality: 90 }
    }
}

impl StreamOptions {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.min(100) as i32,
        }
    }

    /// Quality clamped to the valid range.
    pub fn quality_level(&self) -> u8 {
        self.quality.clamp(0, 100) as u8
    }

    /// Serialize the handshake: options header followed by the JSON body.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TeleportError> {
        let body = serde_json::to_vec(self)?;
        let header = OptionsHeader {
            size: body.len() as i32,
        };
        let mut out = Vec::with_capacity(OptionsHeader::SIZE + body.len());
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parse the JSON body (without the options header).
    pub fn from_body(body: &[u8]) -> Result<Self, TeleportError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Write the options handshake to a freshly connected stream.
pub async fn write_handshake<W>(writer: &mut W, options: &StreamOptions) -> Result<(), TeleportError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = options.to_bytes()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and validate the options handshake from a freshly accepted stream.
///
/// A wrong magic, an oversized body or malformed JSON is a protocol
/// violation; the caller closes the connection.
pub async fn read_handshake<R>(reader: &mut R) -> Result<StreamOptions, TeleportError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; OptionsHeader::SIZE];
    reader.read_exact(&mut head).await?;
    let header = OptionsHeader::decode(&head)?;

    let size = header.size as usize;
    if size > MAX_OPTIONS_SIZE {
        return Err(TeleportError::PayloadTooLarge {
            size,
            max: MAX_OPTIONS_SIZE,
        });
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;
    StreamOptions::from_body(&body)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_uses_pascal_case() {
        let json = serde_json::to_string(&StreamOptions::new(75)).unwrap();
        assert_eq!(json, r#"{"Quality":75}"#);
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(StreamOptions::new(250).quality_level(), 100);
        let o = StreamOptions::from_body(br#"{"Quality":-4}"#).unwrap();
        assert_eq!(o.quality_level(), 0);
    }

    #[tokio::test]
    async fn handshake_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_handshake(&mut a, &StreamOptions::new(42)).await.unwrap();
        let got = read_handshake(&mut b).await.unwrap();
        assert_eq!(got.quality_level(), 42);
    }

    #[tokio::test]
    async fn bad_magic_is_rejected() {
        let mut input: &[u8] = b"NOPE\x02\x00\x00\x00{}";
        let err = read_handshake(&mut input).await.unwrap_err();
        assert!(matches!(err, TeleportError::InvalidMagic(_)));
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let mut bytes = b"OPTS".to_vec();
        bytes.extend_from_slice(&3i32.to_le_bytes());
        bytes.extend_from_slice(b"{{{");
        let mut input: &[u8] = &bytes;
        assert!(matches!(
            read_handshake(&mut input).await,
            Err(TeleportError::Encoding(_))
        ));
    }
}
