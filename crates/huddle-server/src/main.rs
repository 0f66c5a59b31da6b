//! # Huddle Server
//!
//! Serves the lobby signaling endpoint (`/lobby`), a health check (`/health`) and the
//! advertised ICE servers (`/ice-servers`) from one process.

use clap::Parser;
use huddle_gateway::GatewayState;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Debug, Parser)]
#[command(name = "huddle", version, about = "Huddle lobby signaling server")]
struct Args {
    /// Config file (without extension); defaults to an optional `config.*` in the
    /// working directory.
    #[arg(short, long, env = "HUDDLE_CONFIG")]
    config: Option<String>,

    /// Override `server.host`.
    #[arg(long)]
    host: Option<String>,

    /// Override `server.port`.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = huddle_common::config::init(args.config.as_deref())?.clone();
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Initialize tracing (structured logging)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,tower_http=debug".into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("Starting Huddle v{}", env!("CARGO_PKG_VERSION"));

    let state = GatewayState::new(&config);
    let app = huddle_gateway::build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!(
        ring_timeout_secs = config.calls.ring_timeout_secs,
        notify_peer_on_disconnect = config.calls.notify_peer_on_disconnect,
        ice_servers = config.ice.servers.len(),
        "Lobby listening on ws://{addr}/lobby"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Huddle stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
