//! Serialized write path
//!
//! Every mutation of the remote tables, whether a full reconciliation cycle or
//! a single API write, runs on one worker task in arrival order. A cycle can
//! therefore never interleave with an interactive write between reading the
//! remote titles and applying its plan.
//!
//! Reconciliation cycle: read snapshot -> diff against remote titles -> apply
//! plan -> broadcast `FullSync` with the resulting rows.
//!
//! Interactive write: apply to the remote table -> rewrite the snapshot from
//! remote state (when write-back is on) -> broadcast the targeted event.

use crate::error::SyncError;
use crate::gateway::RemoteGateway;
use crate::hub::BroadcastHub;
use comics_common::config::SnapshotConfig;
use comics_common::snapshot::{self, SnapshotDigest};
use comics_common::{diff, Catalog, CatalogRecord, ChangeEvent, StoredRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Commands queued ahead of the one running before new ones are refused
const QUEUE_DEPTH: usize = 64;

/// What started a reconciliation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Startup,
    FileWatch,
    Manual,
}

/// Result of one reconciliation cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub catalog: Catalog,
    pub trigger: Trigger,
    pub deleted: u64,
    pub upserted: u64,
    /// Rows in the remote table after the cycle
    pub total: usize,
    /// The file event came from our own write-back; nothing was done
    pub skipped: bool,
}

type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

enum Command {
    Reconcile {
        catalog: Catalog,
        trigger: Trigger,
        reply: Option<Reply<CycleReport>>,
    },
    Create {
        record: CatalogRecord,
        reply: Reply<StoredRecord>,
    },
    Update {
        id: i64,
        record: CatalogRecord,
        reply: Reply<StoredRecord>,
    },
    Delete {
        catalog: Catalog,
        id: i64,
        reply: Reply<StoredRecord>,
    },
}

/// Cloneable sender side of the worker queue
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<Command>,
}

impl SyncHandle {
    /// Run a reconciliation cycle and wait for its report
    pub async fn reconcile(
        &self,
        catalog: Catalog,
        trigger: Trigger,
    ) -> Result<CycleReport, SyncError> {
        self.call(|reply| Command::Reconcile {
            catalog,
            trigger,
            reply: Some(reply),
        })
        .await
    }

    /// Queue a reconciliation cycle without waiting; false if the queue is
    /// full or the worker is gone
    pub fn request_reconcile(&self, catalog: Catalog, trigger: Trigger) -> bool {
        match self.tx.try_send(Command::Reconcile {
            catalog,
            trigger,
            reply: None,
        }) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not queue {} reconciliation: {}", catalog, e);
                false
            }
        }
    }

    pub async fn create(&self, record: CatalogRecord) -> Result<StoredRecord, SyncError> {
        self.call(|reply| Command::Create { record, reply }).await
    }

    pub async fn update(&self, id: i64, record: CatalogRecord) -> Result<StoredRecord, SyncError> {
        self.call(|reply| Command::Update { id, record, reply }).await
    }

    pub async fn delete(&self, catalog: Catalog, id: i64) -> Result<StoredRecord, SyncError> {
        self.call(|reply| Command::Delete { catalog, id, reply }).await
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| SyncError::WorkerStopped)?;
        rx.await.map_err(|_| SyncError::WorkerStopped)?
    }
}

pub struct SyncWorker {
    gateway: RemoteGateway,
    hub: Arc<BroadcastHub>,
    snapshots: SnapshotConfig,
    write_back: bool,
    last_written: HashMap<Catalog, SnapshotDigest>,
    last_error: Arc<RwLock<Option<String>>>,
}

impl SyncWorker {
    pub fn new(
        gateway: RemoteGateway,
        hub: Arc<BroadcastHub>,
        snapshots: SnapshotConfig,
        write_back: bool,
        last_error: Arc<RwLock<Option<String>>>,
    ) -> Self {
        Self {
            gateway,
            hub,
            snapshots,
            write_back,
            last_written: HashMap::new(),
            last_error,
        }
    }

    /// Start the worker task; it exits once every handle is dropped
    pub fn spawn(self) -> (SyncHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let task = tokio::spawn(self.run(rx));
        (SyncHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!("Sync worker started");
        while let Some(command) = rx.recv().await {
            match command {
                Command::Reconcile {
                    catalog,
                    trigger,
                    reply,
                } => {
                    let result = self.reconcile(catalog, trigger).await;
                    if let Err(e) = &result {
                        self.record_failure(format!(
                            "{} reconciliation ({:?}) failed: {}",
                            catalog, trigger, e
                        ))
                        .await;
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                Command::Create { record, reply } => {
                    let result = self.create(record).await;
                    let _ = reply.send(result);
                }
                Command::Update { id, record, reply } => {
                    let result = self.update(id, record).await;
                    let _ = reply.send(result);
                }
                Command::Delete { catalog, id, reply } => {
                    let result = self.delete(catalog, id).await;
                    let _ = reply.send(result);
                }
            }
        }
        info!("Sync worker stopped");
    }

    async fn reconcile(
        &mut self,
        catalog: Catalog,
        trigger: Trigger,
    ) -> Result<CycleReport, SyncError> {
        let path = self.snapshots.path(catalog).to_path_buf();
        let bytes = snapshot::read_bytes(&path).await?;

        if trigger == Trigger::FileWatch
            && self.last_written.get(&catalog) == Some(&SnapshotDigest::of(&bytes))
        {
            debug!("Ignoring change to {}: written by write-back", path.display());
            return Ok(CycleReport {
                catalog,
                trigger,
                deleted: 0,
                upserted: 0,
                total: 0,
                skipped: true,
            });
        }

        let fresh = snapshot::parse(catalog, &bytes)?;
        let existing = self.gateway.existing_titles(catalog).await?;
        let plan = diff(&existing, fresh);
        let applied = self.gateway.apply(catalog, &plan).await?;

        let rows = self.gateway.list(catalog).await?;
        let total = rows.len();
        self.hub
            .broadcast(&ChangeEvent::full_sync(catalog, rows))
            .await;

        info!(
            "Synced {} from {} ({:?}): deleted={} upserted={} total={}",
            catalog,
            path.display(),
            trigger,
            applied.deleted,
            applied.upserted,
            total
        );

        Ok(CycleReport {
            catalog,
            trigger,
            deleted: applied.deleted,
            upserted: applied.upserted,
            total,
            skipped: false,
        })
    }

    async fn create(&mut self, record: CatalogRecord) -> Result<StoredRecord, SyncError> {
        let row = self.gateway.create(&record).await?;
        info!("Added {} '{}' (id {})", row.catalog(), row.title(), row.id);
        self.after_write(ChangeEvent::add(row.clone())).await;
        Ok(row)
    }

    async fn update(&mut self, id: i64, record: CatalogRecord) -> Result<StoredRecord, SyncError> {
        let row = self.gateway.update(id, &record).await?;
        info!("Updated {} '{}' (id {})", row.catalog(), row.title(), row.id);
        self.after_write(ChangeEvent::update(row.clone())).await;
        Ok(row)
    }

    async fn delete(&mut self, catalog: Catalog, id: i64) -> Result<StoredRecord, SyncError> {
        let row = self.gateway.delete(catalog, id).await?;
        info!("Deleted {} '{}' (id {})", catalog, row.title(), row.id);
        self.after_write(ChangeEvent::delete(row.clone())).await;
        Ok(row)
    }

    /// Realign the snapshot with remote state, then notify live clients
    async fn after_write(&mut self, event: ChangeEvent) {
        let catalog = event.catalog();
        if self.write_back {
            if let Err(e) = self.write_back(catalog).await {
                self.record_failure(format!("{} snapshot write-back failed: {}", catalog, e))
                    .await;
            }
        }
        self.hub.broadcast(&event).await;
    }

    async fn write_back(&mut self, catalog: Catalog) -> Result<(), SyncError> {
        let mut rows = self.gateway.list(catalog).await?;
        rows.sort_by_key(|row| row.id);
        let records: Vec<CatalogRecord> = rows.into_iter().map(|row| row.record).collect();

        let digest = snapshot::write(self.snapshots.path(catalog), &records).await?;
        self.last_written.insert(catalog, digest);
        Ok(())
    }

    async fn record_failure(&self, message: String) {
        error!("{}", message);
        *self.last_error.write().await = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RemoteError, RemoteStore};
    use comics_common::{ChangeKind, Comic, UpcomingBook};
    use serde_json::Value;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        snapshots: SnapshotConfig,
        store: Arc<MemoryStore>,
        hub: Arc<BroadcastHub>,
        handle: SyncHandle,
        last_error: Arc<RwLock<Option<String>>>,
    }

    fn fixture(write_back: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let snapshots = SnapshotConfig {
            comics: dir.path().join("comic.json"),
            upcoming: dir.path().join("upcoming.json"),
        };
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(BroadcastHub::new(16));
        let last_error = Arc::new(RwLock::new(None));
        let worker = SyncWorker::new(
            RemoteGateway::new(store.clone()),
            hub.clone(),
            snapshots.clone(),
            write_back,
            last_error.clone(),
        );
        let (handle, _task) = worker.spawn();
        Fixture {
            _dir: dir,
            snapshots,
            store,
            hub,
            handle,
            last_error,
        }
    }

    fn write_json(path: &Path, value: &str) {
        std::fs::write(path, value).unwrap();
    }

    fn frame(raw: String) -> Value {
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_cycle_applies_plan_and_broadcasts_full_sync() {
        let fx = fixture(true);
        fx.store
            .upsert(Catalog::Comics, &[Comic::new("A").into(), Comic::new("C").into()])
            .await
            .unwrap();
        write_json(&fx.snapshots.comics, r#"[{"title":"A"},{"title":"B"}]"#);
        let mut client = fx.hub.register().await;

        let report = fx
            .handle
            .reconcile(Catalog::Comics, Trigger::Manual)
            .await
            .unwrap();

        assert_eq!((report.deleted, report.upserted, report.total), (1, 2, 2));
        let titles = fx.store.titles(Catalog::Comics).await.unwrap();
        assert!(titles.contains("B") && !titles.contains("C"));

        let event = frame(client.frames.recv().await.unwrap());
        assert_eq!(event["kind"], "full_sync");
        assert_eq!(event["payload"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_missing_snapshot_aborts_cycle() {
        let fx = fixture(true);
        fx.store.insert(&Comic::new("Keep").into()).await.unwrap();
        let mut client = fx.hub.register().await;

        let err = fx
            .handle
            .reconcile(Catalog::Comics, Trigger::FileWatch)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Snapshot(_)));
        assert_eq!(fx.store.titles(Catalog::Comics).await.unwrap().len(), 1);
        assert!(fx.last_error.read().await.is_some());
        assert!(client.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_snapshot_leaves_remote_untouched() {
        let fx = fixture(true);
        fx.store.insert(&UpcomingBook::new("Keep").into()).await.unwrap();
        write_json(&fx.snapshots.upcoming, r#"{"not":"a list"}"#);

        let err = fx
            .handle
            .reconcile(Catalog::Upcoming, Trigger::Manual)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Snapshot(_)));
        assert_eq!(fx.store.titles(Catalog::Upcoming).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_writes_back_and_broadcasts_add() {
        let fx = fixture(true);
        let mut client = fx.hub.register().await;

        let row = fx.handle.create(Comic::new("Fresh").into()).await.unwrap();

        let event = frame(client.frames.recv().await.unwrap());
        assert_eq!(event["kind"], "add");
        assert_eq!(event["payload"]["id"], row.id);

        let on_disk = snapshot::read(Catalog::Comics, &fx.snapshots.comics)
            .await
            .unwrap();
        assert_eq!(on_disk, vec![CatalogRecord::from(Comic::new("Fresh"))]);
    }

    #[tokio::test]
    async fn test_write_back_file_event_is_ignored() {
        let fx = fixture(true);
        fx.handle.create(Comic::new("Mine").into()).await.unwrap();

        let report = fx
            .handle
            .reconcile(Catalog::Comics, Trigger::FileWatch)
            .await
            .unwrap();
        assert!(report.skipped);

        // A manual cycle over the same file still runs
        let report = fx
            .handle
            .reconcile(Catalog::Comics, Trigger::Manual)
            .await
            .unwrap();
        assert!(!report.skipped);
        assert_eq!(report.total, 1);
    }

    #[tokio::test]
    async fn test_api_write_survives_following_cycle() {
        let fx = fixture(true);
        write_json(&fx.snapshots.comics, r#"[{"title":"Seed"}]"#);
        fx.handle
            .reconcile(Catalog::Comics, Trigger::Startup)
            .await
            .unwrap();

        fx.handle.create(Comic::new("Added").into()).await.unwrap();
        fx.handle
            .reconcile(Catalog::Comics, Trigger::Manual)
            .await
            .unwrap();

        let titles = fx.store.titles(Catalog::Comics).await.unwrap();
        assert!(titles.contains("Seed") && titles.contains("Added"));
    }

    #[tokio::test]
    async fn test_delete_missing_id_emits_nothing() {
        let fx = fixture(true);
        let mut client = fx.hub.register().await;

        let err = fx.handle.delete(Catalog::Comics, 5).await.unwrap_err();

        assert!(matches!(err, SyncError::Remote(RemoteError::NotFound(_))));
        assert!(client.frames.try_recv().is_err());
        assert!(!fx.snapshots.comics.exists());
    }

    #[tokio::test]
    async fn test_update_broadcasts_update_without_write_back() {
        let fx = fixture(false);
        let row = fx.handle.create(Comic::new("Old").into()).await.unwrap();
        let mut client = fx.hub.register().await;

        let mut renamed = Comic::new("New");
        renamed.genre = "horror".to_string();
        let updated = fx.handle.update(row.id, renamed.into()).await.unwrap();

        assert_eq!(updated.id, row.id);
        let event = frame(client.frames.recv().await.unwrap());
        assert_eq!(event["kind"], "update");
        assert_eq!(event["payload"]["genre"], "horror");
        assert!(!fx.snapshots.comics.exists());
    }

    #[tokio::test]
    async fn test_duplicate_titles_in_snapshot_last_wins() {
        let fx = fixture(false);
        write_json(
            &fx.snapshots.comics,
            r#"[{"title":"X","genre":"first"},{"title":"X","genre":"second"}]"#,
        );

        fx.handle
            .reconcile(Catalog::Comics, Trigger::Manual)
            .await
            .unwrap();

        let rows = fx.store.list(Catalog::Comics).await.unwrap();
        assert_eq!(rows.len(), 1);
        let CatalogRecord::Comic(comic) = &rows[0].record else {
            panic!("expected comic");
        };
        assert_eq!(comic.genre, "second");
    }

    #[tokio::test]
    async fn test_change_kind_of_delete_event() {
        let fx = fixture(false);
        let row = fx.handle.create(Comic::new("Bye").into()).await.unwrap();
        let mut client = fx.hub.register().await;

        let removed = fx.handle.delete(Catalog::Comics, row.id).await.unwrap();
        assert_eq!(removed.id, row.id);

        let event = frame(client.frames.recv().await.unwrap());
        assert_eq!(event["kind"], serde_json::to_value(ChangeKind::Delete).unwrap());
    }
}
