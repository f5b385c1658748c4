//! swatch-relay: WebSocket gateway for the room synchronization engine.
//!
//! Accepts WebSocket connections, routes each into its room by token, and
//! shuttles commands in and state deltas out. All room semantics live in
//! swatch-sync; the relay only speaks the wire envelope.

mod connection;
mod protocol;

use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use swatch_sync::registry::{RegistryConfig, RoomRegistry};

use crate::connection::handle_connection;

#[derive(Parser)]
#[command(name = "swatch-relay", about = "WebSocket gateway for SWatch rooms")]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 9090)]
    port: u16,

    /// How long an empty room survives before retirement, in seconds.
    #[arg(long, default_value_t = 60)]
    room_ttl: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "swatch_relay=info,swatch_sync=info".into()),
        )
        .init();

    let args = Args::parse();
    let registry = RoomRegistry::new(RegistryConfig {
        retire_grace: Duration::from_secs(args.room_ttl),
        ..RegistryConfig::default()
    });

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!("swatch-relay listening on {}", addr);

    // Spawn the empty-room reaper.
    let reaper_registry = registry.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(15)).await;
            reaper_registry.reap_idle().await;
            let count = reaper_registry.count().await;
            tracing::debug!(rooms = count, "reaper tick");
        }
    });

    // Accept loop.
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let registry = registry.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, addr, registry).await,
                        Err(e) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}
