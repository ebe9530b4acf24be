//! Discovery self-descriptor.

use serde::{Deserialize, Serialize};

use crate::error::TeleportError;

/// Protocol version advertised in every announcement.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// What a producer broadcasts about itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct AnnouncePayload {
    /// Human-readable stream name.
    pub name: String,
    /// TCP port of the media stream.
    pub port: u16,
    /// Whether the stream carries both audio and video. Consumers preroll
    /// until both media types were seen when this is set.
    #[serde(default)]
    pub audio_and_video: bool,
    /// Protocol version of the announcing peer. Older peers omit it.
    #[serde(default)]
    pub version: String,
}

impl AnnouncePayload {
    pub fn new(name: impl Into<String>, port: u16, audio_and_video: bool) -> Self {
        Self {
            name: name.into(),
            port,
            audio_and_video,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TeleportError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TeleportError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_version() {
        let p = AnnouncePayload::new("studio-a", 40123, true);
        let parsed = AnnouncePayload::from_bytes(&p.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, p);
        assert_eq!(parsed.version, PROTOCOL_VERSION);
    }

    #[test]
    fn accepts_descriptor_without_version() {
        let p = AnnouncePayload::from_bytes(br#"{"Name":"old","Port":5000}"#).unwrap();
        assert_eq!(p.name, "old");
        assert_eq!(p.port, 5000);
        assert!(!p.audio_and_video);
        assert!(p.version.is_empty());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(AnnouncePayload::from_bytes(b"\x00\x01").is_err());
    }
}
