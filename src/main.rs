//! Tic-Tac-Toe Relay Server
//!
//! Binds the WebSocket endpoint and serves matches until Ctrl-C.

use std::sync::Arc;
use tracing::{info, error};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tictactoe_relay::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ServerConfig::from_env();

    info!("Tic-Tac-Toe Relay Server v{}", VERSION);
    info!("Bind address: {}", config.bind_addr);
    info!("Allowed origin: {:?}", config.allowed_origin);
    info!("Max connections: {}", config.max_connections);

    let server = Arc::new(GameServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal_server.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await?;

    info!("Server stopped");
    Ok(())
}
