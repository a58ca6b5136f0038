//! Remote table store
//!
//! One trait, three backends: a direct Postgres pool, a hosted REST table API,
//! and process-local tables. Every table has a unique constraint on `title`
//! plus a server-assigned `id` and `created_at`.

use async_trait::async_trait;
use comics_common::config::{StoreBackend, StoreConfig};
use comics_common::{Catalog, CatalogRecord, StoredRecord};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

mod memory;
mod postgres;
mod rest;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use rest::RestStore;

/// Remote store failures; none are retried automatically
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Store could not be reached or answered with an unexpected failure
    #[error("remote store unreachable: {0}")]
    Unreachable(String),

    /// Write rejected by a uniqueness or integrity constraint
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Addressed row does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    pub(crate) fn missing(catalog: Catalog, id: i64) -> Self {
        RemoteError::NotFound(format!("{} record with id {}", catalog.label(), id))
    }

    pub(crate) fn duplicate_title(title: &str) -> Self {
        RemoteError::ConstraintViolation(format!("title '{}' already exists", title))
    }

    pub(crate) fn wrong_catalog(catalog: Catalog, record: &CatalogRecord) -> Self {
        RemoteError::ConstraintViolation(format!(
            "'{}' is not a {} record",
            record.title(),
            catalog
        ))
    }
}

/// Batch writes only accept records belonging to the addressed catalog
fn check_catalog(catalog: Catalog, record: &CatalogRecord) -> Result<(), RemoteError> {
    if record.catalog() != catalog {
        return Err(RemoteError::wrong_catalog(catalog, record));
    }
    Ok(())
}

/// Table operations used by the gateway
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;

    /// All rows, newest first
    async fn list(&self, catalog: Catalog) -> Result<Vec<StoredRecord>, RemoteError>;

    /// Titles of all rows
    async fn titles(&self, catalog: Catalog) -> Result<BTreeSet<String>, RemoteError>;

    async fn get(&self, catalog: Catalog, id: i64) -> Result<StoredRecord, RemoteError>;

    /// Plain insert; a title collision is a `ConstraintViolation`
    async fn insert(&self, record: &CatalogRecord) -> Result<StoredRecord, RemoteError>;

    /// Replace every non-id field of row `id` with `record`
    async fn update(&self, id: i64, record: &CatalogRecord) -> Result<StoredRecord, RemoteError>;

    /// Delete row `id`, returning what was removed
    async fn delete(&self, catalog: Catalog, id: i64) -> Result<StoredRecord, RemoteError>;

    /// Delete every row whose title is in `titles` in one call
    async fn delete_titles(
        &self,
        catalog: Catalog,
        titles: &[String],
    ) -> Result<u64, RemoteError>;

    /// Insert-or-replace keyed on title in one call; replaced rows get a
    /// fresh `created_at`
    async fn upsert(
        &self,
        catalog: Catalog,
        records: &[CatalogRecord],
    ) -> Result<u64, RemoteError>;
}

/// Open the backend selected in `config`
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn RemoteStore>, RemoteError> {
    let store: Arc<dyn RemoteStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Postgres => {
            let options = postgres::connect_options(&config.postgres)?;
            let store =
                PgStore::connect_with(options, config.postgres.max_connections.unwrap_or(10))
                    .await?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
        StoreBackend::Rest => {
            let (Some(url), Some(key)) = (&config.rest.url, &config.rest.service_key) else {
                return Err(RemoteError::Unreachable(
                    "no REST table API settings".to_string(),
                ));
            };
            Arc::new(RestStore::new(url, key)?)
        }
    };

    info!("Remote store backend: {}", store.backend());
    Ok(store)
}
