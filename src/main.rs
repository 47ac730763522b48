use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use voice_bridge::{ServerConfig, handlers, routes, state::AppState};

/// Voice bridge - connects browser and telephony calls to a conversation backend
#[derive(Parser, Debug)]
#[command(name = "voice-bridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Must be installed before the first TLS connection to the backend
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let address = config.address();
    let audiosocket_address = config.audiosocket_address.clone();

    let app_state = AppState::new(config)?;

    let audiosocket_task = match audiosocket_address {
        Some(addr) => {
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|e| anyhow!("Failed to bind AudioSocket listener on {}: {}", addr, e))?;
            info!("AudioSocket listener bound on {}", addr);
            Some(tokio::spawn(handlers::serve_audiosocket(
                listener,
                app_state.clone(),
            )))
        }
        None => None,
    };

    let app = routes::app(app_state.clone());

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;
    let listener = TcpListener::bind(socket_addr)
        .await
        .map_err(|e| anyhow!("Failed to bind {}: {}", socket_addr, e))?;
    info!("Starting server on {}", socket_addr);

    let shutdown = app_state.shutdown_token();
    let signal_state = app_state.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal_state.shutdown();
    });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    if let Some(task) = audiosocket_task
        && let Err(e) = task.await
    {
        error!("AudioSocket listener task failed: {}", e);
    }

    info!("Server stopped");
    Ok(())
}
