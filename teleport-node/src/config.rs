//! Configuration for the relay node.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use teleport_core::discovery::DEFAULT_DISCOVERY_PORT;
use teleport_core::pipeline::{DEFAULT_LAG_THRESHOLD, DEFAULT_MAX_IN_FLIGHT};
use teleport_core::{
    DecodeConfig, DiscoveryConfig, EncodeConfig, OverflowPolicy, ProducerConfig, ReceiverConfig,
    ReceiverTarget, SenderConfig,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Media connection settings.
    pub network: NetworkConfig,
    /// Stream content and pipeline tuning.
    pub stream: StreamConfig,
    /// LAN discovery.
    pub discovery: DiscoverySection,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the producer listens on.
    pub bind_addr: IpAddr,
    /// TCP port for the media stream (0 = any free port).
    pub port: u16,
    /// Per-consumer send queue length.
    pub queue_capacity: usize,
    /// Queue depth that logs a warning.
    pub high_water: usize,
    /// Queue depth above which frames are dropped for that consumer.
    pub critical: usize,
    /// What to do with a frame for a saturated consumer.
    pub overflow: Overflow,
    /// Receiver dial deadline in milliseconds.
    pub dial_timeout_ms: u64,
    /// Pause between failed dials in milliseconds.
    pub retry_delay_ms: u64,
    /// Keep-alive period in milliseconds.
    pub keep_alive_ms: u64,
}

/// Fan-out behavior for a saturated consumer, as written in the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overflow {
    /// Drop the frame for that consumer only.
    #[default]
    Drop,
    /// Wait for room in that consumer's queue.
    Block,
}

impl From<Overflow> for OverflowPolicy {
    fn from(o: Overflow) -> Self {
        match o {
            Overflow::Drop => OverflowPolicy::Drop,
            Overflow::Block => OverflowPolicy::Block,
        }
    }
}

/// Stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Announced name; empty uses the host name.
    pub name: String,
    /// Compression quality 0-100.
    pub quality: u8,
    /// Produce and expect both audio and video.
    pub audio_and_video: bool,
    /// Test pattern resolution.
    pub width: u32,
    pub height: u32,
    /// Test pattern frame rate.
    pub fps: u32,
    /// Test tone sample rate.
    pub sample_rate: u32,
    /// Transforms allowed in flight before frames are dropped.
    pub max_in_flight: usize,
    /// Queued media time, in milliseconds, that counts as lag.
    pub lag_threshold_ms: u64,
}

/// Discovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// Announce the producer on the LAN.
    pub enabled: bool,
    pub port: u16,
    /// Broadcast (or unicast) address for announcements.
    pub announce_addr: IpAddr,
    /// Address the discovery listener binds.
    pub listen_addr: IpAddr,
    pub announce_interval_ms: u64,
    pub peer_ttl_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Seconds between statistics lines (0 disables them).
    pub stats_interval_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        let sender = SenderConfig::default();
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            queue_capacity: sender.queue_capacity,
            high_water: sender.high_water,
            critical: sender.critical,
            overflow: Overflow::Drop,
            dial_timeout_ms: 100,
            retry_delay_ms: 100,
            keep_alive_ms: 5000,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            quality: 90,
            audio_and_video: true,
            width: 640,
            height: 360,
            fps: 30,
            sample_rate: 48_000,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            lag_threshold_ms: DEFAULT_LAG_THRESHOLD.as_millis() as u64,
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_DISCOVERY_PORT,
            announce_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            announce_interval_ms: 1000,
            peer_ttl_ms: 5000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            stats_interval_secs: 5,
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    // ── Conversions ──────────────────────────────────────────────

    pub fn to_discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            announce_addr: self.discovery.announce_addr,
            listen_addr: self.discovery.listen_addr,
            port: self.discovery.port,
            announce_interval: Duration::from_millis(self.discovery.announce_interval_ms.max(50)),
            peer_ttl: Duration::from_millis(self.discovery.peer_ttl_ms.max(100)),
            ..DiscoveryConfig::default()
        }
    }

    /// Convert into a producer session config, clamping out-of-range
    /// values.
    pub fn to_producer_config(&self) -> ProducerConfig {
        let capacity = self.network.queue_capacity.max(1);
        let critical = self.network.critical.clamp(1, capacity);
        ProducerConfig {
            name: self.stream.name.clone(),
            bind_addr: SocketAddr::new(self.network.bind_addr, self.network.port),
            audio_and_video: self.stream.audio_and_video,
            announce: self.discovery.enabled,
            discovery: self.to_discovery_config(),
            encode: EncodeConfig {
                max_in_flight: self.stream.max_in_flight.max(1),
                lag_threshold: Duration::from_millis(self.stream.lag_threshold_ms.max(1)),
                quality: self.stream.quality.min(100),
            },
            sender: SenderConfig {
                queue_capacity: capacity,
                high_water: self.network.high_water.min(critical),
                critical,
                policy: self.network.overflow.into(),
            },
            keep_alive_interval: Duration::from_millis(self.network.keep_alive_ms.max(100)),
            ..ProducerConfig::default()
        }
    }

    /// Convert into a receiver session config for `target`.
    pub fn to_receiver_config(&self, target: ReceiverTarget) -> ReceiverConfig {
        ReceiverConfig {
            quality: self.stream.quality.min(100),
            dial_timeout: Duration::from_millis(self.network.dial_timeout_ms.max(10)),
            retry_delay: Duration::from_millis(self.network.retry_delay_ms),
            decode: DecodeConfig {
                max_in_flight: self.stream.max_in_flight.max(1),
                ..DecodeConfig::default()
            },
            ..ReceiverConfig::new(target)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = NodeConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("queue_capacity"));
        assert!(text.contains("announce_addr"));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&NodeConfig::default()).unwrap();
        let parsed: NodeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.discovery.port, 9999);
        assert_eq!(parsed.stream.quality, 90);
        assert_eq!(parsed.network.critical, 800);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: NodeConfig = toml::from_str("[stream]\nname = \"studio\"\n").unwrap();
        assert_eq!(parsed.stream.name, "studio");
        assert_eq!(parsed.stream.fps, 30);
        assert!(parsed.discovery.enabled);
    }

    #[test]
    fn producer_config_clamps() {
        let mut cfg = NodeConfig::default();
        cfg.stream.quality = 250;
        cfg.network.queue_capacity = 10;
        cfg.network.critical = 50;
        cfg.network.high_water = 40;
        cfg.network.overflow = Overflow::Block;

        let producer = cfg.to_producer_config();
        assert_eq!(producer.encode.quality, 100);
        assert_eq!(producer.sender.critical, 10);
        assert_eq!(producer.sender.high_water, 10);
        assert_eq!(producer.sender.policy, OverflowPolicy::Block);
    }

    #[test]
    fn overflow_policy_parses_lowercase_names() {
        let parsed: NodeConfig = toml::from_str("[network]\noverflow = \"block\"\n").unwrap();
        assert_eq!(parsed.network.overflow, Overflow::Block);
        assert_eq!(
            parsed.to_producer_config().sender.policy,
            OverflowPolicy::Block
        );

        let text = toml::to_string_pretty(&NodeConfig::default()).unwrap();
        assert!(text.contains("overflow = \"drop\""));
    }

    #[test]
    fn unknown_overflow_policy_is_rejected() {
        let parsed = toml::from_str::<NodeConfig>("[network]\noverflow = \"sometimes\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn receiver_config_uses_network_timings() {
        let mut cfg = NodeConfig::default();
        cfg.network.dial_timeout_ms = 250;
        let target = ReceiverTarget::Direct {
            info: teleport_core::ConnectionInfo::new("127.0.0.1", 4000),
            audio_and_video: true,
        };
        let rc = cfg.to_receiver_config(target);
        assert_eq!(rc.dial_timeout, Duration::from_millis(250));
        assert_eq!(rc.quality, 90);
    }
}
