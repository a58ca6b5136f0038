//! comics-sync - catalog snapshot sync and live-update service
//!
//! Startup order: configuration, store connection, sync worker, one
//! reconciliation per catalog, snapshot watcher, HTTP server.

use anyhow::{Context, Result};
use clap::Parser;
use comics_common::config::{ServiceConfig, StoreBackend};
use comics_common::Catalog;
use comics_sync::media::{CloudinaryClient, MediaHost};
use comics_sync::worker::Trigger;
use comics_sync::{build_router, store, watcher, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_LOG_FILTER: &str = "comics_sync=info,comics_common=info,tower_http=info";

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "comics-sync")]
#[command(about = "Catalog snapshot sync and live-update service")]
#[command(version)]
struct Args {
    /// TOML config file (defaults to the per-user config location)
    #[arg(short, long, env = "COMICS_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:8080
    #[arg(short, long)]
    bind: Option<String>,

    /// Remote store backend: memory, postgres or rest
    #[arg(short, long)]
    store: Option<StoreBackend>,

    /// Do not watch the snapshot files
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting comics-sync v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let mut config =
        ServiceConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(backend) = args.store {
        config.store.backend = backend;
    }
    if args.no_watch {
        config.sync.watch = false;
    }
    config.validate().context("Invalid configuration")?;

    let store = store::connect(&config.store)
        .await
        .context("Failed to connect to remote store")?;

    let media: Option<Arc<dyn MediaHost>> = if config.media.is_configured() {
        let client = CloudinaryClient::from_config(&config.media)
            .context("Failed to create media host client")?;
        info!("Media uploads enabled");
        Some(Arc::new(client))
    } else {
        info!("Media host credentials not set; POST /upload disabled");
        None
    };

    let (state, _worker) = AppState::new(store, &config, media);

    if config.sync.sync_on_startup {
        for catalog in Catalog::ALL {
            // Failures are logged by the worker and do not stop startup
            if let Ok(report) = state.sync.reconcile(catalog, Trigger::Startup).await {
                info!("Startup sync of {}: {} rows", catalog, report.total);
            }
        }
    }

    let _watcher = if config.sync.watch {
        match watcher::watch(
            &config.snapshots,
            Duration::from_millis(config.sync.debounce_ms),
            state.sync.clone(),
        ) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!("Snapshot watching disabled: {}", e);
                None
            }
        }
    } else {
        info!("Snapshot watching disabled by configuration");
        None
    };

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("comics-sync listening on http://{}", config.bind);
    info!("Health check: http://{}/health", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("comics-sync stopped");
    Ok(())
}

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
            Ok(mut sig) => {
                sig.recv().await;
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
            info!("Received SIGTERM, shutting down");
        },
    }
}
