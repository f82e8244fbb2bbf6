//! Strata backend server.

use clap::Parser;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use strata::{config::Config, create_app_with_state, state::AppState};

/// Strata - MCP Streamable HTTP server for hierarchical datasets
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(long, env = "STRATA_SERVER_PORT")]
    port: Option<u16>,

    /// Address to bind (non-loopback addresses are overridden)
    #[arg(long, env = "STRATA_SERVER_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_figment(args.port, args.bind)?;

    // Initialize logging - RUST_LOG wins, then the configured level
    let default_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    info!("Starting Strata backend server...");

    let state = AppState::new();
    state.start();

    let app = create_app_with_state(state.clone());

    // Loopback only, regardless of configuration
    let addr = SocketAddr::new(config.effective_bind(), config.port);
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_state = state.clone();
    let shutdown_signal = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down gracefully...");
        shutdown_state.shutdown().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}
