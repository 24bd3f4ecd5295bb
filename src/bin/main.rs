//! GroupWire node - decentralized, cryptographically-authenticated group
//! chat over a friend-to-friend DHT overlay.

use std::io::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use groupwire::config::Cli;
use groupwire::crypto::ExtendedKeypair;
use groupwire::dht::InMemoryDht;
use groupwire::time::SystemClock;
use groupwire::transport::{InMemoryTransport, Transport};
use groupwire::{GroupWire, NullCallbacks};

/// Load the identity from `path` if it exists, otherwise generate one and
/// save it there. Persisted as raw hex (no persisted state in core,
/// callers own the format).
fn load_or_generate_identity(path: &Path) -> Result<ExtendedKeypair> {
    if path.exists() {
        let hex_str = std::fs::read_to_string(path)
            .with_context(|| format!("reading identity file {}", path.display()))?;
        let bytes = hex::decode(hex_str.trim()).context("identity file is not valid hex")?;
        let secret: [u8; 64] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("identity file must hold exactly 64 bytes"))?;
        Ok(ExtendedKeypair::from_secret_bytes(&secret))
    } else {
        let keypair = ExtendedKeypair::generate();
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("creating identity file {}", path.display()))?;
        file.write_all(hex::encode(keypair.to_secret_bytes()).as_bytes())?;
        Ok(keypair)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&cli.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting GroupWire...");

    let identity_file = cli.identity_file.clone();
    let nickname = cli.nickname.clone();
    let config = cli.into_config();

    let self_keypair = match &identity_file {
        Some(path) => load_or_generate_identity(path)?,
        None => ExtendedKeypair::generate(),
    };
    tracing::info!(epk = %self_keypair.epk(), "Node identity ready");

    #[cfg(feature = "live-net")]
    let transport: Box<dyn Transport> = {
        let udp = groupwire::transport::udp::UdpTransport::bind(config.bind_addr).await?;
        tracing::info!(addr = %udp.local_addr(), "Bound UDP socket");
        Box::new(udp)
    };
    #[cfg(not(feature = "live-net"))]
    let transport: Box<dyn Transport> = {
        tracing::warn!("Built without the `live-net` feature: using a loopback-only in-memory transport");
        Box::new(InMemoryTransport::new(config.bind_addr))
    };

    let dht = Box::new(InMemoryDht::new());
    let clock = Box::new(SystemClock);
    let mut node = GroupWire::new(config, self_keypair, dht, transport, clock, Box::new(NullCallbacks));

    let chat_id = node.create_chat(&nickname);
    tracing::info!(chat_id = %chat_id, "Founded a new group chat");

    let mut tick = tokio::time::interval(node.config.tick_interval);
    tracing::info!("GroupWire is running. Press Ctrl+C to exit.");

    loop {
        tokio::select! {
            _ = tick.tick() => node.tick(),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down GroupWire...");
                break;
            }
        }
    }

    Ok(())
}
