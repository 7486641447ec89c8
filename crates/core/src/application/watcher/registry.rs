// Watcher Registry - at most one live watcher per subject key

use super::stop::{stop_channel, StopSender, StopToken};
use super::WatcherState;
use crate::domain::SubjectKey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

/// Identifies one watcher instance (a subject may be watched by successive instances)
pub type WatcherId = u64;

/// Everything a freshly registered watcher task receives
pub struct WatcherSlot {
    pub id: WatcherId,
    pub stop: StopToken,
    pub state: watch::Sender<WatcherState>,
}

struct WatcherEntry {
    id: WatcherId,
    stop: StopSender,
    state: watch::Receiver<WatcherState>,
    task: JoinHandle<()>,
}

impl WatcherEntry {
    /// A panicked or finished task is not live, even if it never published `Stopped`
    fn is_live(&self) -> bool {
        !self.task.is_finished() && *self.state.borrow() != WatcherState::Stopped
    }
}

#[derive(Default)]
pub struct WatcherRegistry {
    watchers: Mutex<HashMap<SubjectKey, WatcherEntry>>,
    next_id: AtomicU64,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a watcher for `key` unless a live one exists
    ///
    /// `spawn` is called with the registry lock held, so two concurrent callers
    /// can never both spawn. Returns `false` (no-op) if a live watcher exists.
    pub fn register<F>(&self, key: SubjectKey, spawn: F) -> bool
    where
        F: FnOnce(WatcherSlot) -> JoinHandle<()>,
    {
        let mut watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = watchers.get(&key) {
            if existing.is_live() {
                debug!(subject = %key, watcher_id = existing.id, "Watcher already running");
                return false;
            }
            warn!(subject = %key, watcher_id = existing.id, "Replacing dead watcher");
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop_tx, stop_rx) = stop_channel();
        let (state_tx, state_rx) = watch::channel(WatcherState::Polling);
        let task = spawn(WatcherSlot {
            id,
            stop: stop_rx,
            state: state_tx,
        });

        watchers.insert(
            key.clone(),
            WatcherEntry {
                id,
                stop: stop_tx,
                state: state_rx,
                task,
            },
        );
        info!(subject = %key, watcher_id = id, "Watcher registered");
        true
    }

    /// Signal the watcher for `key` to stop and remove it; idempotent
    ///
    /// The watcher finishes its current cycle (including an in-flight completion)
    /// before exiting. Returns the task handle if a watcher was removed.
    pub fn deregister(&self, key: &SubjectKey) -> Option<JoinHandle<()>> {
        let entry = self
            .watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)?;
        entry.stop.stop();
        info!(subject = %key, watcher_id = entry.id, "Watcher deregistered");
        Some(entry.task)
    }

    /// Remove the entry for `key` only if it still belongs to watcher `id`
    pub(crate) fn retire(&self, key: &SubjectKey, id: WatcherId) -> bool {
        let mut watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
        match watchers.get(key) {
            Some(entry) if entry.id == id => {
                watchers.remove(key);
                debug!(subject = %key, watcher_id = id, "Watcher retired");
                true
            }
            _ => false,
        }
    }

    pub fn is_watching(&self, key: &SubjectKey) -> bool {
        self.watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|entry| entry.is_live())
            .unwrap_or(false)
    }

    /// Current state of the watcher for `key`, if registered
    pub fn state(&self, key: &SubjectKey) -> Option<WatcherState> {
        self.watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|entry| *entry.state.borrow())
    }

    /// Subjects with a live watcher
    pub fn active_subjects(&self) -> Vec<SubjectKey> {
        self.watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, entry)| entry.is_live())
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.active_subjects().len()
    }

    /// Stop every watcher, wait up to `grace`, then abort the stragglers
    ///
    /// Completions run in their own tasks, so aborting a watcher never cancels one.
    pub async fn shutdown(&self, grace: Duration) {
        let entries: Vec<(SubjectKey, WatcherEntry)> = self
            .watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();

        info!(watchers = entries.len(), "Stopping all watchers");
        for (_, entry) in &entries {
            entry.stop.stop();
        }

        let tasks: Vec<JoinHandle<()>> = entries.into_iter().map(|(_, entry)| entry.task).collect();
        let aborts: Vec<AbortHandle> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(grace, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            warn!(grace_ms = grace.as_millis() as u64, "Watchers did not stop within grace period, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
    }
}
