//! Per-catalog CRUD endpoints
//!
//! Mounted once per catalog; the catalog itself rides along as an
//! `Extension`. Writes go through the sync worker so they are ordered with
//! reconciliation cycles, and each one is followed by a targeted broadcast.

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use comics_common::{Catalog, CatalogRecord, StoredRecord};
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Routes for one catalog: `GET /`, `POST /add`, `PUT /update/:id`,
/// `DELETE /delete/:id`
pub fn catalog_routes(catalog: Catalog) -> Router<AppState> {
    Router::new()
        .route("/", get(list_records))
        .route("/add", post(add_record))
        .route("/update/:id", put(update_record))
        .route("/delete/:id", delete(delete_record))
        .layer(Extension(catalog))
}

fn parse_id(raw: &str) -> ApiResult<i64> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid id '{}'", raw)))
}

fn parse_record(catalog: Catalog, body: &[u8]) -> ApiResult<CatalogRecord> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))?;
    Ok(CatalogRecord::from_value(catalog, &value)?)
}

fn confirmation(catalog: Catalog, verb: &str, row: StoredRecord) -> Json<Value> {
    Json(json!({
        "message": format!("{} {}!", catalog.label(), verb),
        "comic": row,
    }))
}

/// GET /api/{catalog}
///
/// Every row, newest first.
pub async fn list_records(
    State(state): State<AppState>,
    Extension(catalog): Extension<Catalog>,
) -> ApiResult<Json<Vec<StoredRecord>>> {
    Ok(Json(state.gateway.list(catalog).await?))
}

/// POST /api/{catalog}/add
pub async fn add_record(
    State(state): State<AppState>,
    Extension(catalog): Extension<Catalog>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let record = parse_record(catalog, &body)?;
    let row = state.sync.create(record).await?;
    Ok(confirmation(catalog, "added", row))
}

/// PUT /api/{catalog}/update/:id
pub async fn update_record(
    State(state): State<AppState>,
    Extension(catalog): Extension<Catalog>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let id = parse_id(&id)?;
    let record = parse_record(catalog, &body)?;
    let row = state.sync.update(id, record).await?;
    Ok(confirmation(catalog, "updated", row))
}

/// DELETE /api/{catalog}/delete/:id
pub async fn delete_record(
    State(state): State<AppState>,
    Extension(catalog): Extension<Catalog>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_id(&id)?;
    let row = state.sync.delete(catalog, id).await?;
    Ok(confirmation(catalog, "deleted", row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_rejects_non_numeric() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert!(matches!(parse_id("abc"), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_parse_record_requires_object() {
        assert!(matches!(
            parse_record(Catalog::Comics, b"[1,2]"),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            parse_record(Catalog::Comics, b"not json"),
            Err(ApiError::BadRequest(_))
        ));
        let record = parse_record(Catalog::Upcoming, br#"{"title":"Soon"}"#).unwrap();
        assert_eq!(record.catalog(), Catalog::Upcoming);
    }
}
