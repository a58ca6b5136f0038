//! Remote store gateway
//!
//! Applies reconciliation plans to the remote tables and serves the single
//! record operations behind the HTTP handlers. Conflict resolution is the
//! store's upsert-on-title; nothing here locks or versions rows.

use crate::store::{RemoteError, RemoteStore};
use comics_common::{Catalog, CatalogRecord, ReconciliationPlan, StoredRecord};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info};

/// Rows touched by one applied plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AppliedCount {
    pub deleted: u64,
    pub upserted: u64,
}

#[derive(Clone)]
pub struct RemoteGateway {
    store: Arc<dyn RemoteStore>,
}

impl RemoteGateway {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub async fn existing_titles(
        &self,
        catalog: Catalog,
    ) -> Result<BTreeSet<String>, RemoteError> {
        self.store.titles(catalog).await
    }

    /// Apply `plan` to `catalog`: one batched delete, then one batched upsert
    ///
    /// The two calls are independent. A failed delete does not stop the
    /// upsert and neither is rolled back; the first failure is returned after
    /// both have been attempted.
    pub async fn apply(
        &self,
        catalog: Catalog,
        plan: &ReconciliationPlan,
    ) -> Result<AppliedCount, RemoteError> {
        let mut applied = AppliedCount::default();
        let mut first_error = None;

        if !plan.to_delete.is_empty() {
            let titles: Vec<String> = plan.to_delete.iter().cloned().collect();
            match self.store.delete_titles(catalog, &titles).await {
                Ok(n) => {
                    applied.deleted = n;
                    info!("Deleted {} {} records: {}", n, catalog, titles.join(", "));
                }
                Err(e) => {
                    error!("Failed to delete removed {} records: {}", catalog, e);
                    first_error = Some(e);
                }
            }
        }

        if !plan.to_upsert.is_empty() {
            match self.store.upsert(catalog, &plan.to_upsert).await {
                Ok(n) => applied.upserted = n,
                Err(e) => {
                    error!("Failed to upsert {} records: {}", catalog, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(applied),
        }
    }

    pub async fn list(&self, catalog: Catalog) -> Result<Vec<StoredRecord>, RemoteError> {
        self.store.list(catalog).await
    }

    pub async fn read(&self, catalog: Catalog, id: i64) -> Result<StoredRecord, RemoteError> {
        self.store.get(catalog, id).await
    }

    pub async fn create(&self, record: &CatalogRecord) -> Result<StoredRecord, RemoteError> {
        self.store.insert(record).await
    }

    pub async fn update(&self, id: i64, record: &CatalogRecord) -> Result<StoredRecord, RemoteError> {
        self.store.update(id, record).await
    }

    pub async fn delete(&self, catalog: Catalog, id: i64) -> Result<StoredRecord, RemoteError> {
        self.store.delete(catalog, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use comics_common::{diff, Comic};

    fn titles(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|t| t.to_string()).collect()
    }

    /// Memory store whose batched delete always fails
    struct BrokenDeletes(MemoryStore);

    #[async_trait]
    impl RemoteStore for BrokenDeletes {
        fn backend(&self) -> &'static str {
            "broken-deletes"
        }
        async fn list(&self, c: Catalog) -> Result<Vec<StoredRecord>, RemoteError> {
            self.0.list(c).await
        }
        async fn titles(&self, c: Catalog) -> Result<BTreeSet<String>, RemoteError> {
            self.0.titles(c).await
        }
        async fn get(&self, c: Catalog, id: i64) -> Result<StoredRecord, RemoteError> {
            self.0.get(c, id).await
        }
        async fn insert(&self, r: &CatalogRecord) -> Result<StoredRecord, RemoteError> {
            self.0.insert(r).await
        }
        async fn update(&self, id: i64, r: &CatalogRecord) -> Result<StoredRecord, RemoteError> {
            self.0.update(id, r).await
        }
        async fn delete(&self, c: Catalog, id: i64) -> Result<StoredRecord, RemoteError> {
            self.0.delete(c, id).await
        }
        async fn delete_titles(&self, _: Catalog, _: &[String]) -> Result<u64, RemoteError> {
            Err(RemoteError::Unreachable("connection reset".to_string()))
        }
        async fn upsert(&self, c: Catalog, r: &[CatalogRecord]) -> Result<u64, RemoteError> {
            self.0.upsert(c, r).await
        }
    }

    async fn seeded(store: Arc<dyn RemoteStore>, items: &[&str]) -> RemoteGateway {
        let records: Vec<CatalogRecord> = items.iter().map(|t| Comic::new(*t).into()).collect();
        store.upsert(Catalog::Comics, &records).await.unwrap();
        RemoteGateway::new(store)
    }

    #[tokio::test]
    async fn test_apply_deletes_and_upserts() {
        let gateway = seeded(Arc::new(MemoryStore::new()), &["A", "C"]).await;
        let existing = gateway.existing_titles(Catalog::Comics).await.unwrap();
        let plan = diff(&existing, vec![Comic::new("A").into(), Comic::new("B").into()]);

        let applied = gateway.apply(Catalog::Comics, &plan).await.unwrap();

        assert_eq!(applied, AppliedCount { deleted: 1, upserted: 2 });
        assert_eq!(
            gateway.existing_titles(Catalog::Comics).await.unwrap(),
            titles(&["A", "B"])
        );
    }

    #[tokio::test]
    async fn test_apply_twice_is_idempotent() {
        let gateway = seeded(Arc::new(MemoryStore::new()), &["A", "C"]).await;
        let existing = gateway.existing_titles(Catalog::Comics).await.unwrap();
        let mut b = Comic::new("B");
        b.year = Some(2001);
        let plan = diff(&existing, vec![Comic::new("A").into(), b.into()]);

        gateway.apply(Catalog::Comics, &plan).await.unwrap();
        let mut once: Vec<(i64, CatalogRecord)> = gateway
            .list(Catalog::Comics)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.id, r.record))
            .collect();

        gateway.apply(Catalog::Comics, &plan).await.unwrap();
        let mut twice: Vec<(i64, CatalogRecord)> = gateway
            .list(Catalog::Comics)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.id, r.record))
            .collect();

        once.sort_by_key(|(id, _)| *id);
        twice.sort_by_key(|(id, _)| *id);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_failed_delete_still_upserts() {
        let store: Arc<dyn RemoteStore> = Arc::new(BrokenDeletes(MemoryStore::new()));
        let gateway = seeded(store, &["Old"]).await;
        let plan = diff(&titles(&["Old"]), vec![Comic::new("New").into()]);

        let err = gateway.apply(Catalog::Comics, &plan).await.unwrap_err();

        assert!(matches!(err, RemoteError::Unreachable(_)));
        assert_eq!(
            gateway.existing_titles(Catalog::Comics).await.unwrap(),
            titles(&["New", "Old"])
        );
    }

    #[tokio::test]
    async fn test_empty_plan_touches_nothing() {
        let store: Arc<dyn RemoteStore> = Arc::new(BrokenDeletes(MemoryStore::new()));
        let gateway = RemoteGateway::new(store);

        let applied = gateway
            .apply(Catalog::Upcoming, &ReconciliationPlan::default())
            .await
            .unwrap();
        assert_eq!(applied, AppliedCount::default());
    }

    #[tokio::test]
    async fn test_read_single_record() {
        let gateway = RemoteGateway::new(Arc::new(MemoryStore::new()));
        let row = gateway.create(&Comic::new("One").into()).await.unwrap();

        assert_eq!(gateway.read(Catalog::Comics, row.id).await.unwrap(), row);
        assert!(matches!(
            gateway.read(Catalog::Upcoming, row.id).await,
            Err(RemoteError::NotFound(_))
        ));
    }
}
