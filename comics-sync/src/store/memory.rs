//! Process-local tables
//!
//! Same contract as the hosted backends, including the title uniqueness
//! constraint, so the gateway and API can be exercised without a database.

use super::{check_catalog, RemoteError, RemoteStore};
use async_trait::async_trait;
use chrono::Utc;
use comics_common::{Catalog, CatalogRecord, StoredRecord};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct Table {
    next_id: i64,
    rows: BTreeMap<i64, StoredRecord>,
}

impl Table {
    fn id_of(&self, title: &str) -> Option<i64> {
        self.rows
            .values()
            .find(|row| row.title() == title)
            .map(|row| row.id)
    }

    fn push(&mut self, record: CatalogRecord) -> StoredRecord {
        self.next_id += 1;
        let row = StoredRecord {
            id: self.next_id,
            record,
            created_at: Utc::now(),
        };
        self.rows.insert(row.id, row.clone());
        row
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Catalog, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn list(&self, catalog: Catalog) -> Result<Vec<StoredRecord>, RemoteError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<StoredRecord> = tables
            .get(&catalog)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn titles(&self, catalog: Catalog) -> Result<BTreeSet<String>, RemoteError> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&catalog)
            .map(|t| t.rows.values().map(|r| r.title().to_string()).collect())
            .unwrap_or_default())
    }

    async fn get(&self, catalog: Catalog, id: i64) -> Result<StoredRecord, RemoteError> {
        let tables = self.tables.read().await;
        tables
            .get(&catalog)
            .and_then(|t| t.rows.get(&id))
            .cloned()
            .ok_or_else(|| RemoteError::missing(catalog, id))
    }

    async fn insert(&self, record: &CatalogRecord) -> Result<StoredRecord, RemoteError> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(record.catalog()).or_default();
        if table.id_of(record.title()).is_some() {
            return Err(RemoteError::duplicate_title(record.title()));
        }
        Ok(table.push(record.clone()))
    }

    async fn update(&self, id: i64, record: &CatalogRecord) -> Result<StoredRecord, RemoteError> {
        let catalog = record.catalog();
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(&catalog)
            .ok_or_else(|| RemoteError::missing(catalog, id))?;

        if table.id_of(record.title()).is_some_and(|other| other != id) {
            return Err(RemoteError::duplicate_title(record.title()));
        }

        let row = table
            .rows
            .get_mut(&id)
            .ok_or_else(|| RemoteError::missing(catalog, id))?;
        row.record = record.clone();
        Ok(row.clone())
    }

    async fn delete(&self, catalog: Catalog, id: i64) -> Result<StoredRecord, RemoteError> {
        let mut tables = self.tables.write().await;
        tables
            .get_mut(&catalog)
            .and_then(|t| t.rows.remove(&id))
            .ok_or_else(|| RemoteError::missing(catalog, id))
    }

    async fn delete_titles(
        &self,
        catalog: Catalog,
        titles: &[String],
    ) -> Result<u64, RemoteError> {
        let mut tables = self.tables.write().await;
        let Some(table) = tables.get_mut(&catalog) else {
            return Ok(0);
        };
        let before = table.rows.len();
        table
            .rows
            .retain(|_, row| !titles.iter().any(|t| t == row.title()));
        Ok((before - table.rows.len()) as u64)
    }

    async fn upsert(
        &self,
        catalog: Catalog,
        records: &[CatalogRecord],
    ) -> Result<u64, RemoteError> {
        for record in records {
            check_catalog(catalog, record)?;
        }

        let mut tables = self.tables.write().await;
        let table = tables.entry(catalog).or_default();
        for record in records {
            match table.id_of(record.title()) {
                Some(id) => {
                    if let Some(row) = table.rows.get_mut(&id) {
                        row.record = record.clone();
                        row.created_at = Utc::now();
                    }
                }
                None => {
                    table.push(record.clone());
                }
            }
        }
        Ok(records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comics_common::{Comic, UpcomingBook};

    #[tokio::test]
    async fn test_insert_assigns_ids_and_enforces_unique_title() {
        let store = MemoryStore::new();
        let a = store.insert(&Comic::new("A").into()).await.unwrap();
        let b = store.insert(&Comic::new("B").into()).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));

        let err = store.insert(&Comic::new("A").into()).await.unwrap_err();
        assert!(matches!(err, RemoteError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_catalogs_are_separate_tables() {
        let store = MemoryStore::new();
        store.insert(&Comic::new("A").into()).await.unwrap();
        store.insert(&UpcomingBook::new("A").into()).await.unwrap();

        assert_eq!(store.titles(Catalog::Comics).await.unwrap().len(), 1);
        assert_eq!(store.titles(Catalog::Upcoming).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_rejects_title_of_other_row() {
        let store = MemoryStore::new();
        store.insert(&Comic::new("A").into()).await.unwrap();
        let b = store.insert(&Comic::new("B").into()).await.unwrap();

        let err = store.update(b.id, &Comic::new("A").into()).await.unwrap_err();
        assert!(matches!(err, RemoteError::ConstraintViolation(_)));

        let renamed = store.update(b.id, &Comic::new("C").into()).await.unwrap();
        assert_eq!(renamed.title(), "C");
        assert_eq!(renamed.id, b.id);
    }

    #[tokio::test]
    async fn test_missing_rows_are_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.delete(Catalog::Comics, 5).await,
            Err(RemoteError::NotFound(_))
        ));
        assert!(matches!(
            store.update(5, &Comic::new("A").into()).await,
            Err(RemoteError::NotFound(_))
        ));
        assert!(matches!(
            store.get(Catalog::Upcoming, 1).await,
            Err(RemoteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_on_title_and_keeps_id() {
        let store = MemoryStore::new();
        let original = store.insert(&Comic::new("A").into()).await.unwrap();

        let mut changed = Comic::new("A");
        changed.genre = "noir".to_string();
        store
            .upsert(Catalog::Comics, &[changed.clone().into(), Comic::new("B").into()])
            .await
            .unwrap();

        let row = store.get(Catalog::Comics, original.id).await.unwrap();
        assert_eq!(row.record, CatalogRecord::Comic(changed));
        assert!(row.created_at >= original.created_at);
        assert_eq!(store.list(Catalog::Comics).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_rejects_foreign_catalog() {
        let store = MemoryStore::new();
        let err = store
            .upsert(Catalog::Comics, &[UpcomingBook::new("A").into()])
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_delete_titles_counts_removed_rows() {
        let store = MemoryStore::new();
        store
            .upsert(
                Catalog::Comics,
                &[Comic::new("A").into(), Comic::new("B").into(), Comic::new("C").into()],
            )
            .await
            .unwrap();

        let removed = store
            .delete_titles(Catalog::Comics, &["A".to_string(), "Z".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(
            store.titles(Catalog::Comics).await.unwrap(),
            ["B", "C"].iter().map(|t| t.to_string()).collect()
        );
    }
}
