//! arcs-backend - Archival records service
//!
//! Serves the batch import endpoint plus the small repository and read-back
//! API around it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arcs_common::config::{config_file_path, prepare_root_folder, resolve_root_folder, TomlConfig};
use arcs_common::RecordTypeRegistry;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arcs_backend::AppState;

/// Command-line arguments for arcs-backend
#[derive(Parser, Debug)]
#[command(name = "arcs-backend")]
#[command(about = "Archival records service with streaming batch import")]
#[command(version)]
struct Args {
    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the configuration file)
    #[arg(short, long, env = "ARCS_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = config_file_path(args.config.as_deref());
    let config = TomlConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("arcs_backend={level},arcs_common={level},tower_http=info", level = config.logging.level)
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting arcs-backend (Git: {}, Built: {}, Profile: {})",
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", config_path.display());

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &config);
    let db_path = prepare_root_folder(&root_folder).context("Failed to initialize root folder")?;
    info!("Root folder: {}", root_folder.display());
    info!("Database: {}", db_path.display());

    let registry = Arc::new(RecordTypeRegistry::standard());
    let db_pool = arcs_common::db::init_database(&db_path, &registry)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    info!(
        transactional = config.import.transactional,
        max_attempts = config.import.max_attempts,
        progress_interval_ms = config.import.progress_interval_ms,
        "Batch import settings"
    );

    let state = AppState::new(db_pool, registry, config.import.clone());
    let app = arcs_backend::build_router(state);

    let port = args.port.unwrap_or(config.server.port);
    let addr = format!("{}:{}", config.server.host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
