//! Broadcast hub for live clients
//!
//! Each connected socket gets a bounded outbound queue. Broadcasting never
//! waits on a client: a full or closed queue unregisters that client on the
//! spot and the event goes on to everyone else. There is no replay buffer, so
//! a client that connects after a broadcast does not see it.

use comics_common::ChangeEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

pub type ClientId = u64;

/// Why a frame could not be handed to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("client queue full")]
    QueueFull,
    #[error("client connection closed")]
    Closed,
}

impl<T> From<mpsc::error::TrySendError<T>> for TransportError {
    fn from(e: mpsc::error::TrySendError<T>) -> Self {
        match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        }
    }
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: usize,
}

/// A registered client's receiving end
pub struct Registration {
    pub id: ClientId,
    pub frames: mpsc::Receiver<String>,
}

pub struct BroadcastHub {
    clients: Mutex<HashMap<ClientId, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl BroadcastHub {
    /// `buffer` is the per-client outbound queue length
    pub fn new(buffer: usize) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    pub async fn register(&self) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.clients.lock().await.insert(id, tx);
        debug!("Live client {} registered", id);
        Registration { id, frames: rx }
    }

    /// Returns false when `id` was already gone
    pub async fn unregister(&self, id: ClientId) -> bool {
        let removed = self.clients.lock().await.remove(&id).is_some();
        if removed {
            debug!("Live client {} unregistered", id);
        }
        removed
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Push `event` to every open client, pruning the ones that cannot take it
    pub async fn broadcast(&self, event: &ChangeEvent) -> BroadcastReport {
        let frame = match event.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to serialize {:?} event: {}", event.kind(), e);
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        let mut clients = self.clients.lock().await;
        clients.retain(|id, tx| match tx.try_send(frame.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(e) => {
                let e = TransportError::from(e);
                debug!("Dropping live client {}: {}", id, e);
                report.pruned += 1;
                false
            }
        });

        debug!(
            "Broadcast {:?} for {}: delivered={} pruned={}",
            event.kind(),
            event.catalog(),
            report.delivered,
            report.pruned
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use comics_common::{Comic, StoredRecord};

    fn event(title: &str) -> ChangeEvent {
        ChangeEvent::add(StoredRecord {
            id: 1,
            record: Comic::new(title).into(),
            created_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_broadcast_with_no_clients() {
        let hub = BroadcastHub::new(4);
        let report = hub.broadcast(&event("A")).await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_every_client_receives_frame() {
        let hub = BroadcastHub::new(4);
        let mut a = hub.register().await;
        let mut b = hub.register().await;
        assert_ne!(a.id, b.id);

        let report = hub.broadcast(&event("A")).await;
        assert_eq!(report.delivered, 2);

        for reg in [&mut a, &mut b] {
            let frame = reg.frames.recv().await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(value["payload"]["title"], "A");
        }
    }

    #[tokio::test]
    async fn test_unregistered_client_gets_nothing() {
        let hub = BroadcastHub::new(4);
        let mut gone = hub.register().await;
        let _stay = hub.register().await;

        assert!(hub.unregister(gone.id).await);
        assert!(!hub.unregister(gone.id).await);

        let report = hub.broadcast(&event("A")).await;
        assert_eq!(report.delivered, 1);
        assert!(gone.frames.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_client_pruned_on_send() {
        let hub = BroadcastHub::new(4);
        let closed = hub.register().await;
        drop(closed.frames);
        let _open = hub.register().await;

        let report = hub.broadcast(&event("A")).await;
        assert_eq!(report, BroadcastReport { delivered: 1, pruned: 1 });
        assert_eq!(hub.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_slow_client_pruned_without_blocking() {
        let hub = BroadcastHub::new(1);
        let mut slow = hub.register().await;

        assert_eq!(hub.broadcast(&event("first")).await.delivered, 1);
        let report = hub.broadcast(&event("second")).await;

        assert_eq!(report.pruned, 1);
        assert_eq!(hub.client_count().await, 0);
        // The frame queued before pruning is still readable, then the stream ends
        assert!(slow.frames.recv().await.is_some());
        assert!(slow.frames.recv().await.is_none());
    }
}
