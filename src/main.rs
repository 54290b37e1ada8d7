//! Crashpoint Game Server
//!
//! Binary entry point: initializes logging, builds the round engine
//! and the WebSocket server from environment configuration, and runs
//! until ctrl-c.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crashpoint::{EngineConfig, GameServer, RoundEngine, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Crashpoint Server v{}", VERSION);

    let server_config = server_config_from_env()?;
    info!("bind address: {}", server_config.bind_addr);

    let engine = Arc::new(RoundEngine::new(EngineConfig::default()));
    let server = GameServer::new(server_config, Arc::clone(&engine));

    Arc::clone(&engine).start().await;

    tokio::select! {
        result = server.run() => {
            result.context("server terminated")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            server.shutdown();
        }
    }

    engine.stop().await;
    info!("goodbye");
    Ok(())
}

/// Build the server configuration from `PORT` / `BIND_ADDR`.
fn server_config_from_env() -> anyhow::Result<ServerConfig> {
    let mut config = ServerConfig::default();

    if let Ok(addr) = std::env::var("BIND_ADDR") {
        config.bind_addr = addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid BIND_ADDR: {addr}"))?;
    } else if let Ok(port) = std::env::var("PORT") {
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid PORT: {port}"))?;
        config.bind_addr = SocketAddr::new(config.bind_addr.ip(), port);
    }

    Ok(config)
}
