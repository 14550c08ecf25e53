//! windband-convert - Wind band conversion service
//!
//! Accepts uploaded recordings as jobs, converts them in the background, and
//! serves the resulting parts as a zip archive.
//!
//! Default port: 5740

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};
use windband_common::config::{load_or_default, write_toml_config, RootFolderInitializer};

use windband_convert::config::{Cli, ServiceConfig};
use windband_convert::services::PlaceholderEngine;
use windband_convert::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise start from the CLI level and switch to the
    // configured level once the config file has been read
    let rust_log_set = std::env::var_os("RUST_LOG").is_some();
    let initial_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(cli.log_level.as_deref().unwrap_or("info"))
    });
    let (filter, filter_handle) = reload::Layer::new(initial_filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = cli.config_path();
    let toml_config = load_or_default(config_path.as_deref());
    let config = ServiceConfig::from_sources(&cli, &toml_config);

    if !rust_log_set {
        filter_handle
            .reload(EnvFilter::new(&config.log_level))
            .context("Failed to apply configured log level")?;
    }

    if cli.write_config {
        let path = config_path.context("No configuration file location available")?;
        write_toml_config(&config.to_toml(), &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote configuration to {}", path.display());
        return Ok(());
    }

    info!("Starting windband-convert");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let initializer = RootFolderInitializer::new(config.root_folder.clone());
    initializer
        .ensure_directories_exist()
        .context("Failed to initialize root folder")?;
    info!("Root folder: {}", initializer.root_folder().display());

    let engine = Arc::new(PlaceholderEngine::new(config.stage_delay));
    let state = AppState::new(&initializer, &config, engine);
    info!(
        engine = state.orchestrator.engine_name(),
        retention_secs = state.tracker.retention().as_secs(),
        job_timeout = ?config.job_timeout,
        "Job services initialized"
    );

    let app = windband_convert::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
    info!("Listening on http://{}", config.bind_address);
    info!("Health check: http://{}/health", config.bind_address);

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
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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
