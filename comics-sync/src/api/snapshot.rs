//! Raw comic snapshot

use axum::{extract::State, Json};
use comics_common::{snapshot, Catalog};
use serde_json::Value;
use tracing::error;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// GET /
///
/// The comic snapshot file exactly as stored, parsed only to check it is
/// JSON. A missing or unparsable file is a server error, not a client one.
pub async fn comic_snapshot(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let path = state.snapshots.path(Catalog::Comics);

    let bytes = snapshot::read_bytes(path).await.map_err(|e| {
        error!("Error reading {}: {}", path.display(), e);
        ApiError::Internal("Failed to load API list.".to_string())
    })?;

    let value = serde_json::from_slice(&bytes).map_err(|e| {
        error!("Error parsing {}: {}", path.display(), e);
        ApiError::Internal(format!("Invalid JSON format in {}", path.display()))
    })?;

    Ok(Json(value))
}
