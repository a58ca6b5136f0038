//! Snapshot-to-remote reconciliation planning
//!
//! Pure set arithmetic over titles. The plan is built fresh for every cycle
//! and handed straight to the remote gateway.

use crate::records::CatalogRecord;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// What one reconciliation cycle must change in the remote table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    /// Titles present remotely but absent from the snapshot
    pub to_delete: BTreeSet<String>,
    /// Snapshot records, unique by title
    pub to_upsert: Vec<CatalogRecord>,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_upsert.is_empty()
    }
}

/// Compute the delete and upsert sets for `fresh` against `existing` titles
///
/// When a title occurs more than once in `fresh`, the last occurrence wins and
/// keeps its position relative to the other survivors.
pub fn diff(existing: &BTreeSet<String>, fresh: Vec<CatalogRecord>) -> ReconciliationPlan {
    let mut seen: HashSet<String> = HashSet::with_capacity(fresh.len());
    let mut to_upsert: Vec<CatalogRecord> = fresh
        .into_iter()
        .rev()
        .filter(|record| seen.insert(record.title().to_string()))
        .collect();
    to_upsert.reverse();

    let to_delete = existing
        .iter()
        .filter(|title| !seen.contains(title.as_str()))
        .cloned()
        .collect();

    ReconciliationPlan {
        to_delete,
        to_upsert,
    }
}
