//! Change notifier.
//!
//! An unbounded one-to-many edge-triggered signal. Subscribers acquire a
//! handle before reading their first snapshot and drop it when done. A
//! broadcast delivers at-least-once to every handle acquired before it;
//! no payload is carried, so subscribers must re-check state after every
//! wake. Broadcasting never blocks: each handle holds a capacity-1
//! channel and a full channel already encodes a pending wake.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

#[derive(Default)]
struct Registry {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<()>>>,
    next_id: AtomicU64,
}

/// Broadcast side of the change signal. Owned by the store; cloned
/// handles share one subscriber registry.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    registry: Arc<Registry>,
}

impl ChangeNotifier {
    /// Create a notifier with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a wake handle. Broadcasts after this call (and before the
    /// handle is dropped) are guaranteed to be observable on it.
    pub fn subscribe(&self) -> NotifyHandle {
        let (tx, rx) = mpsc::channel(1);
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.subscribers.lock().insert(id, tx);
        NotifyHandle {
            id,
            rx,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Wake every current subscriber. Non-blocking; a subscriber with a
    /// wake already pending coalesces with it.
    pub fn broadcast(&self) {
        let subscribers = self.registry.subscribers.lock();
        for tx in subscribers.values() {
            let _ = tx.try_send(());
        }
    }

    /// Number of live handles.
    pub fn subscriber_count(&self) -> usize {
        self.registry.subscribers.lock().len()
    }
}

/// A subscriber's wake handle. Dropping it unsubscribes and never blocks
/// a broadcaster.
pub struct NotifyHandle {
    id: u64,
    rx: mpsc::Receiver<()>,
    registry: Arc<Registry>,
}

impl NotifyHandle {
    /// Wait for the next wake. Consumes one pending wake if present.
    pub async fn notified(&mut self) {
        // The sender side lives in the registry for as long as this
        // handle does, so recv() only resolves on an actual wake.
        let _ = self.rx.recv().await;
    }
}

impl Drop for NotifyHandle {
    fn drop(&mut self) {
        self.registry.subscribers.lock().remove(&self.id);
    }
}
