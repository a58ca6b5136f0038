//! HTTP and websocket handlers for comics-sync

pub mod catalog;
pub mod health;
pub mod snapshot;
pub mod sync;
pub mod upload;
pub mod ws;

pub use catalog::catalog_routes;
pub use health::health_routes;
pub use snapshot::comic_snapshot;
pub use sync::update_database;
pub use upload::{upload_comic, MAX_UPLOAD_BYTES};
pub use ws::ws_handler;
