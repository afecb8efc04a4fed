//! Obsync server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use obsync_core::config::AppConfig;
use obsync_server::bootstrap::ensure_admin_token;
use obsync_server::{AppState, create_router};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Obsync - a self-hosted synchronization server for encrypted note vaults
#[derive(Parser, Debug)]
#[command(name = "obsyncd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "OBSYNC_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Obsync v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration: TOML file (optional) with OBSYNC_* env overrides.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        figment = figment.merge(Toml::file(config_path));
        tracing::info!(path = %config_path.display(), "loaded configuration file");
    } else {
        tracing::warn!(
            path = %config_path.display(),
            "configuration file not found, relying on environment variables"
        );
    }
    let config: AppConfig = figment
        .merge(Env::prefixed("OBSYNC_").split("__"))
        .extract()
        .context("invalid configuration")?;

    // Construct stores from configuration.
    let metadata = obsync_metadata::from_config(&config.metadata)
        .await
        .context("failed to open metadata store")?;
    let chunks = obsync_storage::from_config(&config.storage)
        .await
        .context("failed to open chunk store")?;

    metadata
        .health_check()
        .await
        .context("metadata store health check failed")?;
    chunks
        .health_check()
        .await
        .context("chunk store health check failed")?;
    tracing::info!(backend = chunks.backend_name(), "chunk store ready");

    ensure_admin_token(metadata.as_ref(), &config.admin)
        .await
        .context("admin token bootstrap failed")?;

    let bind = config.server.bind.clone();
    let state = AppState::new(config, metadata, chunks);
    let router = create_router(state);

    let addr: SocketAddr = bind.parse().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
