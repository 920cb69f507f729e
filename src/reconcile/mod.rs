//! Dual-source status reconciliation.
//!
//! Webhook pushes and poll samples are both unreliable: either may arrive
//! late, twice, or not at all. Both are turned into [`Signal`]s and applied
//! through the same path. Status only moves forward, a terminal task ignores
//! further progress, and at most one finalization per task is in flight, so
//! the order in which the two sources deliver does not change the outcome.

mod poller;
mod signal;

pub use poller::spawn_poller;
pub use signal::{
    PollSample, Signal, SignalKind, SignalSource, WebhookBody, WebhookPayload, STATUS_UPDATE_EVENT,
    TEST_EVENT,
};

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::finalize::{persist, FinalizeOutcome, Finalizer};
use crate::registry::{RegistryError, TaskRegistry};
use crate::store::TaskSink;
use crate::task::{TaskPatch, TaskStatus};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("webhook payload has no task_id")]
    MissingTaskId,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("could not restore task from storage: {0}")]
    Storage(String),
}

/// What applying a signal did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Nothing changed (duplicate, stale or already terminal).
    Ignored,
    Updated,
    LogsAppended(usize),
    Finalized(FinalizeOutcome),
    Failed,
}

#[derive(Clone)]
pub struct Reconciler {
    registry: TaskRegistry,
    finalizer: Finalizer,
    sink: Arc<dyn TaskSink>,
    finalizing: Arc<Mutex<HashSet<String>>>,
}

/// Removes a task from the in-flight set when finalization ends.
struct FinalizeGuard {
    set: Arc<Mutex<HashSet<String>>>,
    task_id: String,
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.task_id);
    }
}

impl Reconciler {
    pub fn new(registry: TaskRegistry, finalizer: Finalizer, sink: Arc<dyn TaskSink>) -> Self {
        Self {
            registry,
            finalizer,
            sink,
            finalizing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Reconcile one webhook body.
    pub async fn on_webhook_signal(
        &self,
        payload: &WebhookPayload,
    ) -> Result<Applied, ReconcileError> {
        match Signal::from_webhook(payload)? {
            Some(signal) => self.apply(signal).await,
            None => Ok(Applied::Ignored),
        }
    }

    /// Reconcile one poll observation of `task_id`.
    pub async fn on_poll_sample(
        &self,
        task_id: &str,
        sample: PollSample,
    ) -> Result<Vec<Applied>, ReconcileError> {
        let mut applied = Vec::new();
        for signal in Signal::from_poll(task_id, sample) {
            applied.push(self.apply(signal).await?);
        }
        Ok(applied)
    }

    /// Apply a canonical signal.
    ///
    /// The first reference to an id creates it; an id evicted from memory is
    /// restored from storage first, so late signals meet its final state.
    pub async fn apply(&self, signal: Signal) -> Result<Applied, ReconcileError> {
        let Signal {
            task_id,
            source,
            kind,
        } = signal;
        self.track(&task_id).await?;
        tracing::debug!(task_id = %task_id, ?source, ?kind, "Applying signal");

        match kind {
            SignalKind::Progress { status, message } => {
                let mut patch = TaskPatch::status(status);
                patch.latest_message = message;
                match self.registry.advance(&task_id, patch)? {
                    None => Ok(Applied::Ignored),
                    Some(transition) => {
                        if transition.status_changed() {
                            persist(&self.registry, self.sink.as_ref(), &task_id).await;
                        }
                        Ok(Applied::Updated)
                    }
                }
            }
            SignalKind::Logs(observed) => {
                if self.is_terminal(&task_id) {
                    return Ok(Applied::Ignored);
                }
                match self.registry.append_provider_logs(&task_id, observed)? {
                    0 => Ok(Applied::Ignored),
                    added => Ok(Applied::LogsAppended(added)),
                }
            }
            SignalKind::Failed { message, error } => {
                if self.is_terminal(&task_id) {
                    return Ok(Applied::Ignored);
                }
                let transition = self.registry.update(
                    &task_id,
                    TaskPatch::status(TaskStatus::Error).message(message).error(error),
                )?;
                if !transition.became_terminal() {
                    return Ok(Applied::Ignored);
                }
                persist(&self.registry, self.sink.as_ref(), &task_id).await;
                Ok(Applied::Failed)
            }
            SignalKind::Completed => self.complete(&task_id).await,
        }
    }

    /// Move a finished task to `FINALIZING` and run the pipeline, unless it
    /// is already terminal or being finalized.
    async fn complete(&self, task_id: &str) -> Result<Applied, ReconcileError> {
        if self.is_terminal(task_id) {
            return Ok(Applied::Ignored);
        }
        if !self.finalizing.lock().insert(task_id.to_string()) {
            tracing::debug!(task_id = %task_id, "Finalization already in flight");
            return Ok(Applied::Ignored);
        }
        let _guard = FinalizeGuard {
            set: self.finalizing.clone(),
            task_id: task_id.to_string(),
        };

        let transition = self.registry.update(
            task_id,
            TaskPatch::status(TaskStatus::Finalizing).message("Task finished, fetching result"),
        )?;
        if transition.current.is_terminal() {
            return Ok(Applied::Ignored);
        }

        let outcome = self.finalizer.finalize(task_id).await;
        Ok(Applied::Finalized(outcome))
    }

    async fn track(&self, task_id: &str) -> Result<(), ReconcileError> {
        if self.registry.contains(task_id) {
            return Ok(());
        }
        match self.sink.load(task_id).await {
            Ok(Some(stored)) => {
                tracing::debug!(
                    task_id = %task_id,
                    status = %stored.status,
                    "Restored task from storage"
                );
                self.registry.hydrate(stored.into_record());
            }
            Ok(None) => {
                self.registry.init(task_id);
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, "Failed to load task: {:#}", e);
                return Err(ReconcileError::Storage(format!("{:#}", e)));
            }
        }
        Ok(())
    }

    fn is_terminal(&self, task_id: &str) -> bool {
        self.registry
            .get(task_id)
            .map(|r| r.status.is_terminal())
            .unwrap_or(false)
    }
}
