//! Lifecycle of the receiver's connection to a producer.
//!
//! Transitions are validated and return `Result` instead of panicking.

use std::time::{Duration, Instant};

use crate::error::TeleportError;

// ── LinkPhase ────────────────────────────────────────────────────

/// ```text
///  Disconnected ──► Dialing ──► Handshaking ──► Streaming
///       ▲              │             │              │
///       └──────────────┴─────────────┴──────────────┘
///                  (failure, loss or stop)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkPhase {
    /// No connection. Initial state and between retries.
    #[default]
    Disconnected,

    /// TCP connect in progress.
    Dialing,

    /// Connected; sending the options handshake.
    Handshaking,

    /// Receiving media.
    Streaming {
        /// When the connection entered `Streaming`.
        since: Instant,
    },
}

impl std::fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Dialing => write!(f, "Dialing"),
            Self::Handshaking => write!(f, "Handshaking"),
            Self::Streaming { .. } => write!(f, "Streaming"),
        }
    }
}

impl LinkPhase {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Time spent streaming on the current connection.
    pub fn streaming_duration(&self) -> Option<Duration> {
        match self {
            Self::Streaming { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`.
    pub fn begin_dial(&mut self) -> Result<(), TeleportError> {
        match self {
            Self::Disconnected => {
                *self = Self::Dialing;
                Ok(())
            }
            _ => Err(TeleportError::ProtocolViolation(
                "cannot dial: not in Disconnected state",
            )),
        }
    }

    /// Valid from: `Dialing`.
    pub fn begin_handshake(&mut self) -> Result<(), TeleportError> {
        match self {
            Self::Dialing => {
                *self = Self::Handshaking;
                Ok(())
            }
            _ => Err(TeleportError::ProtocolViolation(
                "cannot handshake: not in Dialing state",
            )),
        }
    }

    /// Valid from: `Handshaking`.
    pub fn begin_streaming(&mut self) -> Result<(), TeleportError> {
        match self {
            Self::Handshaking => {
                *self = Self::Streaming {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(TeleportError::ProtocolViolation(
                "cannot stream: handshake not in progress",
            )),
        }
    }

    /// Back to `Disconnected` from any state.
    pub fn disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut phase = LinkPhase::default();
        phase.begin_dial().unwrap();
        assert_eq!(phase, LinkPhase::Dialing);
        phase.begin_handshake().unwrap();
        phase.begin_streaming().unwrap();
        assert!(phase.is_streaming());
        assert!(phase.streaming_duration().is_some());
        phase.disconnect();
        assert!(phase.is_disconnected());
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut phase = LinkPhase::Disconnected;
        assert!(phase.begin_handshake().is_err());
        assert!(phase.begin_streaming().is_err());

        phase.begin_dial().unwrap();
        assert!(phase.begin_dial().is_err());
        assert!(phase.begin_streaming().is_err());
    }

    #[test]
    fn failed_dial_returns_to_disconnected() {
        let mut phase = LinkPhase::Dialing;
        phase.disconnect();
        assert!(phase.begin_dial().is_ok());
    }

    #[test]
    fn display() {
        assert_eq!(LinkPhase::Dialing.to_string(), "Dialing");
        assert_eq!(
            LinkPhase::Streaming {
                since: Instant::now()
            }
            .to_string(),
            "Streaming"
        );
    }
}
