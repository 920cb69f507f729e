//! In-memory task registry.
//!
//! Owns the authoritative [`TaskRecord`] of every live task together with its
//! subscriber set. Each task lives in its own slot behind a mutex; the outer
//! map lock is only held for lookup, insert and eviction. All mutation and
//! broadcast for a task happens under its slot lock, which is what gives
//! subscribers a single consistent order of events.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::RegistryConfig;
use crate::fanout::{Frame, Observer, ObserverId, StreamEvent, SubscriberSet};
use crate::task::{LogEntry, LogOrigin, TaskPatch, TaskRecord, Transition};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("task not found: {0}")]
    NotFound(String),
}

struct TaskSlot {
    record: TaskRecord,
    subscribers: SubscriberSet,
    /// Bumped whenever a pending eviction must be invalidated.
    eviction_epoch: u64,
}

impl TaskSlot {
    fn new(record: TaskRecord) -> Self {
        Self {
            record,
            subscribers: SubscriberSet::new(),
            eviction_epoch: 0,
        }
    }

    fn send(&mut self, event: &StreamEvent) {
        if self.subscribers.is_empty() {
            return;
        }
        match Frame::encode(event) {
            Ok(frame) => {
                self.subscribers.broadcast(&frame, Instant::now());
            }
            Err(e) => {
                tracing::error!(task_id = %self.record.id, "Failed to encode event: {}", e);
            }
        }
    }

    /// Apply a patch and broadcast `update`, plus `done`/`error` on the
    /// terminal transition.
    fn commit(&mut self, patch: TaskPatch) -> Transition {
        let transition = self.record.apply(patch);
        let update = StreamEvent::update(&self.record);
        self.send(&update);
        if transition.became_terminal() {
            if let Some(terminal) = StreamEvent::terminal(&self.record) {
                self.send(&terminal);
            }
        }
        transition
    }

    fn push_entries(&mut self, entries: Vec<LogEntry>) -> usize {
        let added = self.record.append(&entries);
        for entry in entries {
            self.send(&StreamEvent::Log(entry));
        }
        added
    }
}

struct Inner {
    config: RegistryConfig,
    tasks: RwLock<HashMap<String, Arc<Mutex<TaskSlot>>>>,
}

/// Shared handle to the registry. Clones refer to the same state.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl TaskRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                tasks: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    fn slot(&self, id: &str) -> Result<Arc<Mutex<TaskSlot>>, RegistryError> {
        self.inner
            .tasks
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Create the record for `id` if it does not exist yet.
    ///
    /// Returns `true` when a new record was created.
    pub fn init(&self, id: &str) -> bool {
        self.insert_if_absent(id, || TaskRecord::new(id))
    }

    /// Insert a record loaded from durable storage, unless the id is already
    /// live. Returns `true` when the record was inserted.
    pub fn hydrate(&self, record: TaskRecord) -> bool {
        let id = record.id.clone();
        let terminal = record.status.is_terminal();
        let inserted = self.insert_if_absent(&id, move || record);
        if inserted && terminal {
            // Nobody is watching yet; make sure the copy does not linger.
            self.schedule_eviction(&id);
        }
        inserted
    }

    fn insert_if_absent(&self, id: &str, make: impl FnOnce() -> TaskRecord) -> bool {
        if self.inner.tasks.read().contains_key(id) {
            return false;
        }
        let mut tasks = self.inner.tasks.write();
        if tasks.contains_key(id) {
            return false;
        }
        tasks.insert(id.to_string(), Arc::new(Mutex::new(TaskSlot::new(make()))));
        tracing::debug!(task_id = %id, "Task registered");
        true
    }

    pub fn get(&self, id: &str) -> Option<TaskRecord> {
        let slot = self.slot(id).ok()?;
        let record = slot.lock().record.clone();
        Some(record)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.tasks.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every task not yet in a terminal state.
    pub fn active_ids(&self) -> Vec<String> {
        let slots: Vec<(String, Arc<Mutex<TaskSlot>>)> = self
            .inner
            .tasks
            .read()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();
        slots
            .into_iter()
            .filter(|(_, slot)| !slot.lock().record.status.is_terminal())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn subscriber_count(&self, id: &str) -> usize {
        self.slot(id).map(|s| s.lock().subscribers.len()).unwrap_or(0)
    }

    /// Merge a patch into the record and broadcast the change.
    ///
    /// On the transition into a terminal state subscribers also receive the
    /// `done`/`error` event, and teardown followed by eviction is scheduled.
    pub fn update(&self, id: &str, patch: TaskPatch) -> Result<Transition, RegistryError> {
        let slot = self.slot(id)?;
        let transition = slot.lock().commit(patch);
        self.after_update(id, transition);
        Ok(transition)
    }

    /// Like [`Self::update`], but the whole patch is dropped when it would not
    /// move the record forward: a status behind the current one, any change to
    /// a terminal record, or a repeat of the current status and message.
    ///
    /// Returns `None` when the patch was dropped; nothing is broadcast then.
    pub fn advance(&self, id: &str, patch: TaskPatch) -> Result<Option<Transition>, RegistryError> {
        let slot = self.slot(id)?;
        let transition = {
            let mut slot = slot.lock();
            let record = &slot.record;
            let stale = record.status.is_terminal()
                || patch
                    .status
                    .is_some_and(|next| !record.status.can_advance_to(next));
            let repeat = patch.status.map_or(true, |next| next == record.status)
                && patch
                    .latest_message
                    .as_ref()
                    .map_or(true, |m| *m == record.latest_message)
                && patch.result.is_none()
                && patch.error.is_none();
            if stale || repeat {
                return Ok(None);
            }
            slot.commit(patch)
        };
        self.after_update(id, transition);
        Ok(Some(transition))
    }

    fn after_update(&self, id: &str, transition: Transition) {
        if transition.status_rejected {
            tracing::debug!(
                task_id = %id,
                status = %transition.current,
                "Ignoring status that would move backwards"
            );
        }
        if transition.status_changed() {
            tracing::info!(
                task_id = %id,
                from = %transition.previous,
                to = %transition.current,
                "Task status changed"
            );
        }
        if transition.became_terminal() {
            self.schedule_close(id);
        }
    }

    /// Append log entries, broadcasting one `log` event per new entry.
    pub fn append_log(&self, id: &str, entries: Vec<LogEntry>) -> Result<usize, RegistryError> {
        let slot = self.slot(id)?;
        let added = slot.lock().push_entries(entries);
        Ok(added)
    }

    /// Append the part of the provider's full log list this record has not
    /// seen yet.
    ///
    /// The cursor is read and advanced under the slot lock, so two callers
    /// holding the same list never append the same entries twice.
    pub fn append_provider_logs(
        &self,
        id: &str,
        observed: Vec<LogEntry>,
    ) -> Result<usize, RegistryError> {
        let slot = self.slot(id)?;
        let mut slot = slot.lock();
        let known = slot.record.provider_log_count;
        let delta: Vec<LogEntry> = observed
            .into_iter()
            .filter(|e| e.origin == LogOrigin::Provider)
            .skip(known)
            .collect();
        if delta.is_empty() {
            return Ok(0);
        }
        Ok(slot.push_entries(delta))
    }

    /// Register an observer and send it the current snapshot.
    ///
    /// The snapshot is `init`, then a `logs` batch when there are entries,
    /// then `done`/`error` for a finished task. An observer of a finished task
    /// is closed right away instead of being kept.
    pub fn subscribe(&self, id: &str, handle: Arc<dyn Observer>) -> Result<(), RegistryError> {
        let slot = self.slot(id)?;
        let terminal = {
            let mut slot = slot.lock();
            slot.eviction_epoch += 1;

            let mut snapshot = vec![StreamEvent::snapshot(&slot.record)];
            if !slot.record.log_entries.is_empty() {
                snapshot.push(StreamEvent::Logs(slot.record.log_entries.clone()));
            }
            let terminal = StreamEvent::terminal(&slot.record);
            let is_terminal = terminal.is_some();
            snapshot.extend(terminal);

            let mut alive = true;
            for event in &snapshot {
                let delivered = Frame::encode(event)
                    .map_err(|e| e.to_string())
                    .and_then(|frame| handle.deliver(&frame).map_err(|e| e.to_string()));
                if let Err(e) = delivered {
                    tracing::warn!(
                        task_id = %id,
                        observer = %handle.id(),
                        "Snapshot delivery failed: {}",
                        e
                    );
                    alive = false;
                    break;
                }
            }

            if is_terminal || !alive {
                handle.close();
            } else {
                slot.subscribers.add(handle.clone(), Instant::now());
            }
            is_terminal
        };

        tracing::debug!(task_id = %id, observer = %handle.id(), "Subscriber attached");
        if terminal {
            self.schedule_eviction(id);
        }
        Ok(())
    }

    /// Deregister an observer. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: &str, observer: ObserverId) {
        let Ok(slot) = self.slot(id) else {
            return;
        };
        let evict = {
            let mut slot = slot.lock();
            let removed = slot.subscribers.remove(observer);
            removed && slot.subscribers.is_empty() && slot.record.status.is_terminal()
        };
        if evict {
            self.schedule_eviction(id);
        }
    }

    /// Heartbeat every handle idle for longer than the configured interval.
    pub fn sweep_heartbeats(&self, now: Instant) -> usize {
        let idle = self.inner.config.heartbeat_interval;
        let slots: Vec<Arc<Mutex<TaskSlot>>> =
            self.inner.tasks.read().values().cloned().collect();
        slots
            .iter()
            .map(|slot| slot.lock().subscribers.heartbeat(now, idle))
            .sum()
    }

    /// Run [`Self::sweep_heartbeats`] periodically until the handle is aborted.
    pub fn spawn_keepalive(&self) -> JoinHandle<()> {
        let registry = Arc::downgrade(&self.inner);
        let period = self.inner.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = registry.upgrade() else {
                    break;
                };
                let dropped = TaskRegistry { inner }.sweep_heartbeats(Instant::now());
                if dropped > 0 {
                    tracing::debug!("Keep-alive dropped {} dead subscribers", dropped);
                }
            }
        })
    }

    /// Close every subscriber of `id` after the close delay, then start the
    /// eviction grace period.
    fn schedule_close(&self, id: &str) {
        let delay = self.inner.config.close_delay;
        self.spawn_timer(id, move |registry, id| async move {
            tokio::time::sleep(delay).await;
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let registry = TaskRegistry { inner: registry };
            if let Ok(slot) = registry.slot(&id) {
                let closed = slot.lock().subscribers.close_all();
                tracing::debug!(task_id = %id, "Closed {} subscribers", closed);
            }
            registry.schedule_eviction(&id);
        });
    }

    /// Evict `id` after the grace period unless something cancels it first
    /// (a new subscription or another scheduled eviction).
    fn schedule_eviction(&self, id: &str) {
        let Ok(slot) = self.slot(id) else {
            return;
        };
        let epoch = {
            let mut slot = slot.lock();
            slot.eviction_epoch += 1;
            slot.eviction_epoch
        };
        let grace = self.inner.config.eviction_grace;
        self.spawn_timer(id, move |registry, id| async move {
            tokio::time::sleep(grace).await;
            if let Some(inner) = registry.upgrade() {
                TaskRegistry { inner }.evict_if_idle(&id, epoch);
            }
        });
    }

    fn spawn_timer<F, Fut>(&self, id: &str, make: F)
    where
        F: FnOnce(Weak<Inner>, String) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(make(Arc::downgrade(&self.inner), id.to_string()));
            }
            Err(_) => {
                tracing::debug!(task_id = %id, "No runtime; timer not scheduled");
            }
        }
    }

    fn evict_if_idle(&self, id: &str, epoch: u64) -> bool {
        let mut tasks = self.inner.tasks.write();
        let Some(slot) = tasks.get(id) else {
            return false;
        };
        let idle = {
            let slot = slot.lock();
            slot.eviction_epoch == epoch
                && slot.subscribers.is_empty()
                && slot.record.status.is_terminal()
        };
        if idle {
            tasks.remove(id);
            tracing::info!(task_id = %id, "Evicted finished task from memory");
        }
        idle
    }
}
