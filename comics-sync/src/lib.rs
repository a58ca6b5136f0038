//! comics-sync library
//!
//! Keeps two remote catalog tables aligned with local JSON snapshot files,
//! serves CRUD endpoints over them, and pushes every change to connected
//! websocket clients.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use comics_common::config::{ServiceConfig, SnapshotConfig};
use comics_common::Catalog;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod media;
pub mod store;
pub mod watcher;
pub mod worker;

use gateway::RemoteGateway;
use hub::BroadcastHub;
use media::MediaHost;
use store::RemoteStore;
use worker::{SyncHandle, SyncWorker};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Read access to the remote tables
    pub gateway: RemoteGateway,
    /// Queue into the serialized write path
    pub sync: SyncHandle,
    pub hub: Arc<BroadcastHub>,
    /// None when no media host credentials are configured
    pub media: Option<Arc<dyn MediaHost>>,
    pub snapshots: SnapshotConfig,
    pub upload_dir: PathBuf,
    pub startup_time: DateTime<Utc>,
    /// Last failure recorded by the sync worker
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// Wire the gateway, hub and sync worker around `store`
    ///
    /// Returns the worker task alongside the state; it runs until every
    /// clone of the state has been dropped.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        config: &ServiceConfig,
        media: Option<Arc<dyn MediaHost>>,
    ) -> (Self, JoinHandle<()>) {
        let gateway = RemoteGateway::new(store);
        let hub = Arc::new(BroadcastHub::new(config.sync.client_buffer));
        let last_error = Arc::new(RwLock::new(None));

        let worker = SyncWorker::new(
            gateway.clone(),
            hub.clone(),
            config.snapshots.clone(),
            config.sync.write_back,
            last_error.clone(),
        );
        let (sync, worker_task) = worker.spawn();

        let state = Self {
            gateway,
            sync,
            hub,
            media,
            snapshots: config.snapshots.clone(),
            upload_dir: config.media.upload_dir.clone(),
            startup_time: Utc::now(),
            last_error,
        };
        (state, worker_task)
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let catalogs = Router::new()
        .nest("/api/comics", api::catalog_routes(Catalog::Comics))
        .nest("/api/upcoming", api::catalog_routes(Catalog::Upcoming))
        .route("/api/update-database", get(api::update_database));

    let upload = Router::new()
        .route("/upload", post(api::upload_comic))
        .layer(DefaultBodyLimit::max(api::MAX_UPLOAD_BYTES));

    Router::new()
        .route("/", get(api::comic_snapshot))
        .route("/ws", get(api::ws_handler))
        .merge(catalogs)
        .merge(upload)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
