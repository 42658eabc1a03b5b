//! Alert monitor registry.
//!
//! The table of active alerts. Each entry is an [`AlertHandle`] whose async
//! mutex serializes evaluation ticks for that alert; different alerts never
//! share a lock. Readers get owned [`AlertSnapshot`]s published after every
//! tick, so listing alerts never waits on an evaluation in progress.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Mutex as AsyncMutex;

use super::monitor::{AlertMonitor, AlertSnapshot};
use crate::alert::AlertId;

/// Serialized access point for one alert.
pub struct AlertHandle {
    id: AlertId,
    monitor: AsyncMutex<AlertMonitor>,
    cancelled: AtomicBool,
}

impl AlertHandle {
    fn new(monitor: AlertMonitor) -> Self {
        Self {
            id: monitor.id(),
            monitor: AsyncMutex::new(monitor),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> AlertId {
        self.id
    }

    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, AlertMonitor> {
        self.monitor.lock().await
    }

    /// Observed by pending deliveries without taking the monitor lock.
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_flag(&self) -> &AtomicBool {
        &self.cancelled
    }
}

#[derive(Default)]
struct Entries {
    handles: HashMap<AlertId, Arc<AlertHandle>>,
    snapshots: BTreeMap<AlertId, AlertSnapshot>,
    /// Alerts whose stored state could not be read; skipped until a full reload.
    dropped: HashSet<AlertId>,
}

#[derive(Default)]
pub struct AlertRegistry {
    entries: Mutex<Entries>,
}

impl AlertRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn insert(&self, monitor: AlertMonitor) -> Arc<AlertHandle> {
        let handle = Arc::new(AlertHandle::new(monitor));
        let mut entries = self.entries();
        entries.dropped.remove(&handle.id);
        if let Some(previous) = entries.handles.insert(handle.id, handle.clone()) {
            previous.cancel();
        }
        handle
    }

    pub(crate) fn get(&self, id: AlertId) -> Option<Arc<AlertHandle>> {
        self.entries().handles.get(&id).cloned()
    }

    /// Handles in id order.
    pub(crate) fn handles(&self) -> Vec<Arc<AlertHandle>> {
        let entries = self.entries();
        let mut handles: Vec<_> = entries.handles.values().cloned().collect();
        handles.sort_by_key(|h| h.id);
        handles
    }

    /// Replace the whole table; handles not carried over are cancelled.
    pub(crate) fn replace(&self, monitors: Vec<AlertMonitor>) -> Vec<Arc<AlertHandle>> {
        let fresh: Vec<_> = monitors
            .into_iter()
            .map(|m| Arc::new(AlertHandle::new(m)))
            .collect();

        let mut guard = self.entries();
        let entries = &mut *guard;
        for old in entries.handles.values() {
            old.cancel();
        }
        entries.handles = fresh.iter().map(|h| (h.id, h.clone())).collect();
        let handles = &entries.handles;
        entries.snapshots.retain(|id, _| handles.contains_key(id));
        entries.dropped.clear();
        fresh
    }

    /// Drop `id` from the table. Pending work on it is cancelled.
    pub fn remove(&self, id: AlertId) -> bool {
        let mut entries = self.entries();
        entries.snapshots.remove(&id);
        match entries.handles.remove(&id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: AlertId) -> bool {
        self.entries().handles.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<AlertId> {
        let mut ids: Vec<_> = self.entries().handles.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latest published snapshots, soonest departure first.
    pub fn active_alerts(&self) -> Vec<AlertSnapshot> {
        let mut snapshots: Vec<_> = self.entries().snapshots.values().cloned().collect();
        snapshots.sort_by_key(|s| (s.occurrence.departure_at, s.id));
        snapshots
    }

    pub fn snapshot(&self, id: AlertId) -> Option<AlertSnapshot> {
        self.entries().snapshots.get(&id).cloned()
    }

    /// Ignored when `id` left the table while the tick was running.
    pub(crate) fn publish(&self, snapshot: AlertSnapshot) {
        let mut entries = self.entries();
        if entries.handles.contains_key(&snapshot.id) {
            entries.snapshots.insert(snapshot.id, snapshot);
        }
    }

    pub(crate) fn mark_dropped(&self, id: AlertId) {
        let mut entries = self.entries();
        entries.dropped.insert(id);
        entries.snapshots.remove(&id);
        if let Some(handle) = entries.handles.remove(&id) {
            handle.cancel();
        }
    }

    pub(crate) fn is_dropped(&self, id: AlertId) -> bool {
        self.entries().dropped.contains(&id)
    }
}
