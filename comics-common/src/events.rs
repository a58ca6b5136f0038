//! Change events pushed to live clients
//!
//! Wire shape (one JSON text frame per event):
//!
//! ```json
//! {"kind": "update", "catalog": "comics", "payload": {...}, "timestamp": "..."}
//! ```
//!
//! `add`, `update` and `delete` carry the affected row; `full_sync` carries the
//! whole remote row set after a reconciliation cycle.

use crate::records::{Catalog, StoredRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Update,
    Delete,
    FullSync,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChangePayload {
    Record(StoredRecord),
    Records(Vec<StoredRecord>),
}

/// A change to one catalog, built only through the constructors below so the
/// payload always matches the kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    kind: ChangeKind,
    catalog: Catalog,
    payload: ChangePayload,
    timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn add(record: StoredRecord) -> Self {
        Self::single(ChangeKind::Add, record)
    }

    pub fn update(record: StoredRecord) -> Self {
        Self::single(ChangeKind::Update, record)
    }

    pub fn delete(record: StoredRecord) -> Self {
        Self::single(ChangeKind::Delete, record)
    }

    pub fn full_sync(catalog: Catalog, records: Vec<StoredRecord>) -> Self {
        Self {
            kind: ChangeKind::FullSync,
            catalog,
            payload: ChangePayload::Records(records),
            timestamp: Utc::now(),
        }
    }

    fn single(kind: ChangeKind, record: StoredRecord) -> Self {
        Self {
            kind,
            catalog: record.catalog(),
            payload: ChangePayload::Record(record),
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn catalog(&self) -> Catalog {
        self.catalog
    }

    pub fn payload(&self) -> &ChangePayload {
        &self.payload
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
