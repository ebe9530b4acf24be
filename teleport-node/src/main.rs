//! Teleport node: entry point.
//!
//! ```text
//! teleport-node serve                     Stream the test pattern
//! teleport-node receive <host:port>       Receive from an address
//! teleport-node receive --peer <name>     Receive from a discovered producer
//! teleport-node discover                  List producers on the LAN
//! teleport-node --config <path>           Load a custom config TOML
//! teleport-node --gen-config              Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use teleport_core::ConnectionInfo;
use teleport_node::config::NodeConfig;
use teleport_node::service::{NodeService, Target};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "teleport-node", about = "Real-time media relay node")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "teleport-node.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Stream a synthetic test pattern.
    Serve {
        /// Announced name (overrides the config file).
        #[arg(long)]
        name: Option<String>,
        /// TCP port (overrides the config file).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Receive a stream and report what arrives.
    Receive {
        /// Producer address as host:port.
        #[arg(conflicts_with = "peer", required_unless_present = "peer")]
        addr: Option<String>,
        /// Announced name or peer key to wait for.
        #[arg(long)]
        peer: Option<String>,
        /// Requested quality 0-100 (overrides the config file).
        #[arg(long)]
        quality: Option<u8>,
    },
    /// List producers announcing on the LAN.
    Discover,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&NodeConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let Some(mode) = cli.mode else {
        eprintln!("no mode given; try `teleport-node --help`");
        std::process::exit(2);
    };

    let mut config = NodeConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("teleport-node v{}", env!("CARGO_PKG_VERSION"));

    let target = match &mode {
        Mode::Serve { name, port } => {
            if let Some(name) = name {
                config.stream.name = name.clone();
            }
            if let Some(port) = port {
                config.network.port = *port;
            }
            None
        }
        Mode::Receive {
            addr,
            peer,
            quality,
        } => {
            if let Some(q) = quality {
                config.stream.quality = *q;
            }
            match (addr, peer) {
                (Some(addr), _) => Some(Target::Address(parse_addr(addr)?)),
                (None, Some(peer)) => Some(Target::Peer(peer.clone())),
                (None, None) => None,
            }
        }
        Mode::Discover => None,
    };

    let service = NodeService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    match (mode, target) {
        (Mode::Serve { .. }, _) => service.serve().await?,
        (Mode::Receive { .. }, Some(target)) => service.receive(target).await?,
        (Mode::Receive { .. }, None) => return Err("receive needs an address or --peer".into()),
        (Mode::Discover, _) => service.discover().await?,
    }

    Ok(())
}

fn parse_addr(addr: &str) -> Result<ConnectionInfo, Box<dyn std::error::Error>> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got {addr:?}"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok(ConnectionInfo::new(host, port.parse::<u16>()?))
}
