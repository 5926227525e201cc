//! Waiter registry: single-use wakeups keyed by document.
//!
//! A waiter is a `oneshot` pair. The registry keeps the sending halves; the
//! caller holds the receiving half inside a [`Registration`] guard. Broadcast
//! takes the whole sequence for a document out of the map and fires it, so a
//! waiter can be fired at most once. Dropping the guard removes the waiter if
//! it is still registered, which covers every way a wait can end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use lspbridge_types::DocumentUri;
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Identity of one registration. Removal matches on this, not on position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WaiterId(u64);

type WaiterMap = HashMap<DocumentUri, Vec<(WaiterId, oneshot::Sender<()>)>>;

/// Invariant: no document maps to an empty `Vec`.
pub(crate) struct WaiterRegistry {
    next_id: AtomicU64,
    waiters: Mutex<WaiterMap>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Append a fresh, unfired waiter for `uri`.
    pub fn register<'a>(&'a self, uri: &'a DocumentUri) -> Registration<'a> {
        let id = WaiterId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .entry(uri.clone())
            .or_default()
            .push((id, tx));
        Registration {
            registry: self,
            uri,
            id,
            rx,
        }
    }

    /// Remove one waiter. Removing an unknown or already-fired waiter is a no-op.
    pub fn remove(&self, uri: &DocumentUri, id: WaiterId) {
        let mut waiters = self.waiters.lock();
        let Some(entry) = waiters.get_mut(uri) else {
            return;
        };
        entry.retain(|(existing, _)| *existing != id);
        if entry.is_empty() {
            waiters.remove(uri);
        }
    }

    /// Fire and clear every waiter registered for `uri`. Returns how many fired.
    pub fn broadcast(&self, uri: &DocumentUri) -> usize {
        let Some(entry) = self.waiters.lock().remove(uri) else {
            return 0;
        };
        let count = entry.len();
        for (_, tx) in entry {
            // The receiver may already be gone (caller dropped mid-wait).
            let _ = tx.send(());
        }
        count
    }

    pub fn waiter_count(&self, uri: &DocumentUri) -> usize {
        self.waiters.lock().get(uri).map_or(0, Vec::len)
    }

    #[cfg(test)]
    pub fn document_count(&self) -> usize {
        self.waiters.lock().len()
    }

    #[cfg(test)]
    pub fn has_empty_entries(&self) -> bool {
        self.waiters.lock().values().any(Vec::is_empty)
    }
}

/// A registered waiter. Deregisters itself on drop.
pub(crate) struct Registration<'a> {
    registry: &'a WaiterRegistry,
    uri: &'a DocumentUri,
    id: WaiterId,
    rx: oneshot::Receiver<()>,
}

impl Registration<'_> {
    /// Resolves once a broadcast for this document fires the waiter.
    ///
    /// A dropped sender counts as fired: the only path that drops a sender
    /// without sending is the registry itself going away.
    pub async fn fired(&mut self) {
        let _ = (&mut self.rx).await;
    }

    #[cfg(test)]
    pub fn id(&self) -> WaiterId {
        self.id
    }

    #[cfg(test)]
    fn try_fired(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.uri, self.id);
    }
}
