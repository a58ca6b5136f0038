//! Snapshot files
//!
//! A snapshot is a JSON array of flat catalog objects. Reading normalizes every
//! entry; writing emits the canonical form so that a re-read yields the same
//! records. Writes go through a temporary file and a rename so the file watcher
//! never observes a half-written snapshot.

use crate::records::{Catalog, CatalogRecord, RecordError};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Snapshot read/write failures
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Snapshot file missing or unreadable
    #[error("snapshot source unavailable: {path}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Content is not a well-formed list of record-like objects
    #[error("invalid snapshot format: {0}")]
    InvalidFormat(String),

    /// Canonical form could not be written back
    #[error("failed to write snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// SHA-256 of a snapshot's bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotDigest([u8; 32]);

impl SnapshotDigest {
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }
}

impl fmt::Debug for SnapshotDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotDigest({})", &hex::encode(self.0)[..12])
    }
}

/// Read and normalize the snapshot at `path`
pub async fn read(catalog: Catalog, path: &Path) -> Result<Vec<CatalogRecord>, SnapshotError> {
    let bytes = read_bytes(path).await?;
    parse(catalog, &bytes)
}

/// Raw snapshot bytes, mapping any I/O failure to `SourceUnavailable`
pub async fn read_bytes(path: &Path) -> Result<Vec<u8>, SnapshotError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| SnapshotError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        })
}

/// Parse snapshot bytes into canonical records, preserving input order
pub fn parse(catalog: Catalog, bytes: &[u8]) -> Result<Vec<CatalogRecord>, SnapshotError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| SnapshotError::InvalidFormat(format!("not valid JSON: {}", e)))?;

    let Value::Array(items) = value else {
        return Err(SnapshotError::InvalidFormat(
            "top-level value must be an array".to_string(),
        ));
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            CatalogRecord::from_value(catalog, item).map_err(|e: RecordError| {
                SnapshotError::InvalidFormat(format!("entry {}: {}", index, e))
            })
        })
        .collect()
}

/// Canonical byte form of `records`
pub fn render(records: &[CatalogRecord]) -> Result<Vec<u8>, SnapshotError> {
    let mut bytes = serde_json::to_vec_pretty(records)
        .map_err(|e| SnapshotError::InvalidFormat(format!("failed to serialize: {}", e)))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Write `records` in canonical form, returning the digest of what was written
pub async fn write(path: &Path, records: &[CatalogRecord]) -> Result<SnapshotDigest, SnapshotError> {
    let bytes = render(records)?;
    let digest = SnapshotDigest::of(&bytes);

    let tmp_path = temp_path(path);
    let write_err = |source| SnapshotError::Write {
        path: path.to_path_buf(),
        source,
    };

    tokio::fs::write(&tmp_path, &bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    debug!(
        "Wrote {} records to snapshot {} ({:?})",
        records.len(),
        path.display(),
        digest
    );
    Ok(digest)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "snapshot.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Comic, UpcomingBook};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[test]
    fn test_parse_preserves_order_and_normalizes() {
        let bytes = br#"[{"title":"B","year":1990},{"title":"A","description":null}]"#;
        let records = parse(Catalog::Comics, bytes).unwrap();

        let titles: Vec<&str> = records.iter().map(|r| r.title()).collect();
        assert_eq!(titles, ["B", "A"]);
        assert_eq!(records[1], CatalogRecord::Comic(Comic::new("A")));
    }

    #[test]
    fn test_parse_rejects_non_array() {
        let err = parse(Catalog::Comics, br#"{"title":"A"}"#).unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidFormat(_)));
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        let err = parse(Catalog::Comics, b"[{").unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidFormat(_)));
    }

    #[test]
    fn test_parse_reports_bad_entry_index() {
        let err = parse(Catalog::Upcoming, br#"[{"title":"A"}, 42]"#).unwrap_err();
        match err {
            SnapshotError::InvalidFormat(msg) => assert!(msg.starts_with("entry 1")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_source_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = read(Catalog::Comics, &dir.path().join("absent.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("upcoming.json");

        let mut book = UpcomingBook::new("Next Issue");
        book.author = "Someone".to_string();
        book.release_date = NaiveDate::from_ymd_opt(2026, 11, 5);
        book.pre_order = true;
        book.media_urls = vec!["https://cdn/cover.png".to_string()];
        let records = vec![CatalogRecord::from(book), UpcomingBook::new("Later").into()];

        write(&path, &records).await.unwrap();
        let reread = read(Catalog::Upcoming, &path).await.unwrap();

        assert_eq!(reread, records);
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_write_digest_matches_file_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("comics.json");

        let digest = write(&path, &[Comic::new("A").into()]).await.unwrap();
        let bytes = tokio::fs::read(&path).await.unwrap();

        assert_eq!(digest, SnapshotDigest::of(&bytes));
    }
}
