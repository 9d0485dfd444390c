//! Named asynchronous notifications with explicit subscribe/unsubscribe.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type SubscriptionId = u64;

/// Callback invoked on the notifying thread.
pub type Callback<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Subscriber table for one notification source.
///
/// `notify` snapshots the callbacks and releases the table before invoking
/// them, so a callback may freely take its own locks or unsubscribe.
pub struct Subscribers<E> {
    callbacks: DashMap<SubscriptionId, Callback<E>>,
    next_id: AtomicU64,
}

impl<E: Copy> Subscribers<E> {
    pub fn new() -> Self {
        Self {
            callbacks: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, callback: Callback<E>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.insert(id, callback);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    /// Number of callbacks invoked.
    pub fn notify(&self, event: E) -> usize {
        let snapshot: Vec<Callback<E>> = self
            .callbacks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for callback in &snapshot {
            callback(event);
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn clear(&self) {
        self.callbacks.clear();
    }
}

impl<E: Copy> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}
