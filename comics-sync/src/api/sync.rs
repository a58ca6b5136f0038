//! Manual reconciliation endpoint

use axum::{extract::State, Json};
use comics_common::Catalog;
use serde_json::{json, Value};
use tracing::info;

use crate::error::ApiResult;
use crate::worker::Trigger;
use crate::AppState;

/// GET /api/update-database
///
/// Runs one reconciliation cycle per catalog, in catalog order. Every
/// catalog is attempted; the first failure is returned after all have run.
pub async fn update_database(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    info!("Manual database update requested");

    let mut reports = Vec::with_capacity(Catalog::ALL.len());
    let mut first_error = None;
    for catalog in Catalog::ALL {
        match state.sync.reconcile(catalog, Trigger::Manual).await {
            Ok(report) => reports.push(report),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e.into());
    }

    Ok(Json(json!({
        "message": "Database updated",
        "results": reports,
    })))
}
