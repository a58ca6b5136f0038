//! Snapshot file watcher
//!
//! Watches the directories holding the snapshot files and queues a
//! reconciliation cycle when one of them changes. Events for the same catalog
//! arriving within the debounce window collapse into a single cycle fired at
//! the end of the window.

use crate::worker::{SyncHandle, Trigger};
use comics_common::config::SnapshotConfig;
use comics_common::Catalog;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("cannot resolve snapshot directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Running watcher; dropping it stops both the OS watch and the debounce task
pub struct SnapshotWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for SnapshotWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Absolute snapshot path per catalog, as the OS watcher will report it
fn resolve_targets(snapshots: &SnapshotConfig) -> Result<Vec<(PathBuf, Catalog)>, WatchError> {
    Catalog::ALL
        .iter()
        .map(|&catalog| {
            let path = snapshots.path(catalog);
            let parent = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            let dir = parent
                .canonicalize()
                .map_err(|source| WatchError::Directory {
                    path: parent.to_path_buf(),
                    source,
                })?;
            let file_name = path.file_name().unwrap_or(path.as_os_str());
            Ok((dir.join(file_name), catalog))
        })
        .collect()
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Catalogs whose snapshot file `event` touches
fn catalogs_for(event: &Event, targets: &[(PathBuf, Catalog)]) -> Vec<Catalog> {
    if !is_content_change(&event.kind) {
        return Vec::new();
    }
    let mut hits = Vec::new();
    for path in &event.paths {
        for (target, catalog) in targets {
            if path == target && !hits.contains(catalog) {
                hits.push(*catalog);
            }
        }
    }
    hits
}

/// Start watching both snapshot files
pub fn watch(
    snapshots: &SnapshotConfig,
    debounce: Duration,
    handle: SyncHandle,
) -> Result<SnapshotWatcher, WatchError> {
    let targets = resolve_targets(snapshots)?;
    let (changes_tx, changes_rx) = mpsc::unbounded_channel();

    let matcher = targets.clone();
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| match result {
            Ok(event) => {
                for catalog in catalogs_for(&event, &matcher) {
                    // Receiver only goes away on shutdown
                    let _ = changes_tx.send(catalog);
                }
            }
            Err(e) => error!("Watcher error: {}", e),
        },
        Config::default(),
    )?;

    let mut dirs: Vec<&Path> = targets.iter().filter_map(|(p, _)| p.parent()).collect();
    dirs.sort();
    dirs.dedup();
    for dir in dirs {
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        info!("Watching {} for snapshot changes", dir.display());
    }

    let task = tokio::spawn(coalesce(changes_rx, debounce, move |catalog| {
        handle.request_reconcile(catalog, Trigger::FileWatch);
    }));

    Ok(SnapshotWatcher {
        _watcher: watcher,
        task,
    })
}

/// Collapse per-catalog bursts: the first change opens a window of `window`,
/// and `fire` runs once when it closes no matter how many changes landed in it
async fn coalesce<F>(mut changes: mpsc::UnboundedReceiver<Catalog>, window: Duration, mut fire: F)
where
    F: FnMut(Catalog) + Send,
{
    let mut pending: HashMap<Catalog, Instant> = HashMap::new();

    loop {
        let next_deadline = pending.values().min().copied();

        tokio::select! {
            change = changes.recv() => match change {
                Some(catalog) => {
                    pending.entry(catalog).or_insert_with(|| {
                        debug!("Change to {} snapshot detected", catalog);
                        Instant::now() + window
                    });
                }
                None => break,
            },
            _ = sleep_until(next_deadline.unwrap_or_else(Instant::now)), if next_deadline.is_some() => {
                let now = Instant::now();
                let due: Vec<Catalog> = pending
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(catalog, _)| *catalog)
                    .collect();
                for catalog in due {
                    pending.remove(&catalog);
                    fire(catalog);
                }
            }
        }
    }
}
