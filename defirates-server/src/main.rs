//! DeFi Rates (defirates) - Main entry point
//!
//! Serves a filterable table of DeFi yield opportunities with live updates,
//! refreshed from the configured protocol APIs on a fixed interval.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use defirates_common::config::{load_toml_config, ConfigOverrides, ServiceConfig};
use defirates_common::db::init_database;
use defirates_common::{Broadcaster, BroadcasterConfig};
use defirates_server::sample_data::load_sample_data;
use defirates_server::sources::build_sources;
use defirates_server::{build_router, AppState, RefreshOrchestrator};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for defirates
#[derive(Parser, Debug)]
#[command(name = "defirates")]
#[command(about = "DeFi yield rates dashboard with live updates")]
#[command(version)]
struct Args {
    /// Address to bind
    #[arg(long, env = "DEFIRATES_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "DEFIRATES_PORT")]
    port: Option<u16>,

    /// SQLite database file
    #[arg(long = "db", env = "DEFIRATES_DB")]
    database_path: Option<PathBuf>,

    /// Time between refresh cycles (e.g. 300, 30s, 5m, 1h)
    #[arg(long, env = "DEFIRATES_FETCH_INTERVAL")]
    fetch_interval: Option<String>,

    /// Seed demonstration data before the first refresh
    #[arg(long, env = "DEFIRATES_LOAD_SAMPLE")]
    load_sample: bool,

    /// Comma-separated list of sources to poll
    #[arg(long, env = "DEFIRATES_SOURCES", value_delimiter = ',')]
    sources: Option<Vec<String>>,

    /// Path to config.toml
    #[arg(short, long, env = "DEFIRATES_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive (overridden by RUST_LOG)
    #[arg(long, env = "DEFIRATES_LOG")]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            database_path: self.database_path.clone(),
            fetch_interval: self.fetch_interval.clone(),
            // An absent flag defers to the config file
            load_sample: self.load_sample.then_some(true),
            sources: self.sources.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

/// Default filter for a bare level such as `debug`; full directives pass through
fn filter_directive(log_level: &str) -> String {
    if log_level.contains('=') || log_level.contains(',') {
        log_level.to_string()
    } else {
        format!(
            "defirates={0},defirates_server={0},defirates_common={0},tower_http={0}",
            log_level
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml = load_toml_config(args.config.as_deref()).context("Failed to load config file")?;
    let config = ServiceConfig::resolve(args.overrides(), toml).context("Invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(filter_directive(&config.log_level))),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Build identification first, before any slow startup work
    info!(
        "Starting DeFi Rates (defirates) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Database path: {}", config.database_path.display());
    info!(
        "Sources: {} (every {:?})",
        config.sources.join(", "),
        config.fetch_interval
    );

    let pool = init_database(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    info!("✓ Database ready");

    if config.load_sample {
        if let Err(e) = load_sample_data(&pool).await {
            warn!("Failed to load sample data: {}", e);
        }
    }

    let sources = build_sources(&config.sources, &config.http).context("Failed to configure sources")?;

    let broadcaster = Broadcaster::new(BroadcasterConfig::default());
    let state = AppState::new(pool.clone(), broadcaster.clone());
    let orchestrator = Arc::new(
        RefreshOrchestrator::new(pool, sources, broadcaster.clone())
            .with_last_refresh(state.last_refresh.clone()),
    );
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("defirates listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    // Spawned after bind: the first cycle runs while the server already answers
    let shutdown = CancellationToken::new();
    let refresh_task = {
        let orchestrator = Arc::clone(&orchestrator);
        let token = shutdown.clone();
        let interval = config.fetch_interval;
        tokio::spawn(async move { orchestrator.run(interval, token).await })
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone(), broadcaster))
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = refresh_task.await {
        warn!("Refresh task ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
///
/// Stops the refresh loop and ends every live-update stream, so open
/// event-stream connections do not hold the server's drain open.
async fn shutdown_signal(shutdown: CancellationToken, broadcaster: Broadcaster) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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

    shutdown.cancel();
    let closed = broadcaster.close_all();
    info!("Closed {} live-update streams", closed);
}
