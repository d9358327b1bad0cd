//! Relay Server Application
//!
//! Hosts the control channel (chat, files, presenting) and the media channel
//! (audio/video) for a LAN collaboration session.

use anyhow::Result;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_collab_relay::config::ServerConfig;
use lan_collab_relay::server::RelayServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LAN Collaboration Relay");

    // Load config from an optional path argument, or use LAN defaults
    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(Path::new(&path))?,
        None => ServerConfig::default(),
    };

    let server = RelayServer::bind(config).await?;
    tracing::info!(
        tcp = %server.tcp_addr()?,
        udp = %server.udp_addr()?,
        "bound; press Ctrl+C to stop"
    );

    let state = server.state();
    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            RelayServer::shutdown(&state).await;
        }
    }

    Ok(())
}
