//! # Comics Common Library
//!
//! Shared code for the comics catalog sync service:
//! - Catalog record types and normalization
//! - Snapshot file reading and canonical writing
//! - Reconciliation planning (snapshot vs. remote table)
//! - Change events pushed to live clients
//! - Configuration loading

pub mod config;
pub mod error;
pub mod events;
pub mod reconcile;
pub mod records;
pub mod snapshot;

pub use error::{Error, Result};
pub use events::{ChangeEvent, ChangeKind};
pub use reconcile::{diff, ReconciliationPlan};
pub use records::{Catalog, CatalogRecord, Comic, StoredRecord, UpcomingBook};
pub use snapshot::{SnapshotDigest, SnapshotError};
