//! Domain-specific error types for the teleport relay.
//!
//! All fallible operations return `Result<T, TeleportError>`.
//! Per-packet transform failures use the narrower [`TransformError`] so the
//! pipelines can discard a single packet without tearing down a session.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the teleport relay.
#[derive(Debug, Error)]
pub enum TeleportError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A frame header carried a type tag this side does not understand.
    #[error("unknown packet type tag {0:?}")]
    UnknownTag([u8; 4]),

    /// The options handshake did not start with `OPTS`.
    #[error("invalid handshake magic {0:?}")]
    InvalidMagic([u8; 4]),

    /// A field in a header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// A packet or handshake violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Packet Errors ────────────────────────────────────────────
    /// The declared payload exceeds the configured maximum size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A payload did not match the size its header announced.
    #[error("invalid payload length: expected {expected}, got {actual}")]
    InvalidPayloadLength { expected: usize, actual: usize },

    // ── Transform Errors ─────────────────────────────────────────
    /// The media transform stage rejected a packet.
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    // ── Connection Errors ────────────────────────────────────────
    /// Binding the listening socket failed at session start.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The TCP/UDP layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The session was already stopped.
    #[error("session stopped")]
    Stopped,

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a JSON record failed.
    #[error("encoding error: {0}")]
    Encoding(String),
}

// ── TransformError ───────────────────────────────────────────────

/// Failure of the media transform stage for a single packet.
///
/// Returned by [`crate::media::ImageCodec`] implementations. A corrupt
/// payload never poisons shared state; the caller drops the packet.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The input bytes are not a valid compressed image.
    #[error("corrupt image payload: {0}")]
    Corrupt(String),

    /// The image layout or dimensions cannot be handled by this codec.
    #[error("unsupported image: {0}")]
    Unsupported(String),

    /// The compressor itself reported an error.
    #[error("compression failed: {0}")]
    Compression(String),

    /// The worker running the transform panicked or was cancelled.
    #[error("transform worker aborted")]
    Aborted,
}

// ── Convenient From implementations ──────────────────────────────

impl From<serde_json::Error> for TeleportError {
    fn from(e: serde_json::Error) -> Self {
        TeleportError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = TeleportError::UnknownTag(*b"XXXX");
        assert!(e.to_string().contains("unknown packet type"));

        let e = TeleportError::PayloadTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: TeleportError = io_err.into();
        assert!(matches!(e, TeleportError::Connection(_)));
    }

    #[test]
    fn from_transform_keeps_cause() {
        let e: TeleportError = TransformError::Corrupt("bad plane size".into()).into();
        assert!(matches!(e, TeleportError::Transform(TransformError::Corrupt(_))));
        assert!(e.to_string().contains("bad plane size"));
    }

    #[test]
    fn from_json() {
        let bad = serde_json::from_slice::<serde_json::Value>(b"{").unwrap_err();
        let e: TeleportError = bad.into();
        assert!(matches!(e, TeleportError::Encoding(_)));
    }

    #[test]
    fn timeout_reports_its_deadline() {
        let e = TeleportError::Timeout(Duration::from_millis(100));
        assert_eq!(e.to_string(), "timeout after 100ms");
    }
}
