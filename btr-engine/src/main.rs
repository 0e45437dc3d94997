//! btr-engine - Birth-Time Rectification service
//!
//! **Module Identity:**
//! - Name: btr-engine
//! - Default port: 5790
//!
//! Hosts the rectification engine behind HTTP REST + SSE and archives
//! finished sessions to SQLite.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use btr_common::events::EventBus;
use btr_engine::config::TomlConfig;
use btr_engine::predictors::{HttpReasoningService, PredictorRegistry, ReasoningService};
use btr_engine::session::{SessionController, SessionStore};
use btr_engine::AppState;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often idle sessions are looked for
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Command-line arguments for btr-engine
#[derive(Parser, Debug)]
#[command(name = "btr-engine")]
#[command(about = "Birth-time rectification engine")]
#[command(version)]
struct Args {
    /// Bootstrap TOML file
    #[arg(short, long, env = "BTR_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "BTR_PORT")]
    port: Option<u16>,

    /// SQLite archive path (overrides the config file)
    #[arg(short, long, env = "BTR_DATABASE")]
    database: Option<PathBuf>,

    /// Log level or EnvFilter directive (overrides the config file; RUST_LOG wins)
    #[arg(long, env = "BTR_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config)?;

    info!("Starting btr-engine (Birth-Time Rectification)");
    info!(
        "Version: {} ({}, {} build at {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );

    let db_path = args.database.unwrap_or_else(|| config.database_path());
    info!("Database: {}", db_path.display());
    let db_pool = btr_engine::db::init_database_pool(&db_path)
        .await
        .context("Failed to open session archive")?;
    info!("Database connection established");

    let reasoning: Option<(Arc<dyn ReasoningService>, usize)> = match &config.reasoning {
        Some(reasoning) => {
            let service: Arc<dyn ReasoningService> = Arc::new(
                HttpReasoningService::new(reasoning)
                    .map_err(|e| anyhow::anyhow!("Failed to create reasoning client: {}", e))?,
            );
            info!(url = %reasoning.url, "Reasoning service enabled");
            Some((service, reasoning.candidate_count))
        }
        None => None,
    };
    let registry = PredictorRegistry::with_defaults(&config.rectification, reasoning)
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    info!(techniques = ?registry.technique_ids(), "Technique predictors registered");

    // Create event bus for SSE broadcasting
    let event_bus = EventBus::new(256);
    let shutdown = CancellationToken::new();

    let controller = Arc::new(
        SessionController::new(
            config.rectification.clone(),
            Arc::new(registry),
            Arc::new(SessionStore::new()),
            event_bus.clone(),
        )
        .with_archive(db_pool.clone())
        .with_shutdown(shutdown.clone()),
    );
    let purge_task = controller.spawn_purge_task(PURGE_INTERVAL);

    let app = btr_engine::build_router(AppState::new(controller, event_bus, Some(db_pool)));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = purge_task.await {
        warn!("Purge task ended abnormally: {}", e);
    }
    info!("Server shutdown complete");
    Ok(())
}

/// Console plus optional file logging; RUST_LOG overrides the configured level
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let level = &config.logging.level;
    let default_directive = if level.contains('=') {
        level.clone()
    } else {
        format!("btr_engine={level},btr_common={level},tower_http={level}")
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_directive))
        .context("Invalid log level")?;

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
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
