//! Task service: wires the provider, registry, reconciler and sink together
//! and exposes the operations the HTTP layer needs.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::RegistryConfig;
use crate::fanout::{ChannelObserver, Frame, Observer, ObserverId};
use crate::finalize::Finalizer;
use crate::provider::{ProviderError, TaskProvider};
use crate::reconcile::{spawn_poller, Reconciler};
use crate::registry::{RegistryError, TaskRegistry};
use crate::store::{DurableTask, TaskSink};
use crate::task::TaskRecord;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("taskPrompt is required")]
    EmptyPrompt,
    #[error("Failed to create task: {0}")]
    Provider(#[from] ProviderError),
}

/// Where a task lookup was answered from.
#[derive(Debug, Clone)]
pub enum TaskLookup {
    Live(TaskRecord),
    Stored(DurableTask),
}

/// A registered stream: frames arrive on `frames` until the task settles or
/// the subscriber falls too far behind.
pub struct Subscription {
    pub task_id: String,
    pub observer: ObserverId,
    pub frames: tokio::sync::mpsc::Receiver<Frame>,
}

/// Handles of the background loops. Dropping it leaves them running.
pub struct BackgroundTasks {
    poller: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

impl BackgroundTasks {
    pub fn shutdown(self) {
        self.poller.abort();
        self.keepalive.abort();
        tracing::info!("Background loops stopped");
    }
}

#[derive(Clone)]
pub struct TaskService {
    provider: Arc<dyn TaskProvider>,
    registry: TaskRegistry,
    reconciler: Reconciler,
    sink: Arc<dyn TaskSink>,
    webhook_url: Option<String>,
}

impl TaskService {
    pub fn new(
        provider: Arc<dyn TaskProvider>,
        sink: Arc<dyn TaskSink>,
        registry_config: RegistryConfig,
        webhook_url: Option<String>,
    ) -> Self {
        let registry = TaskRegistry::new(registry_config);
        let finalizer = Finalizer::new(provider.clone(), registry.clone(), sink.clone());
        let reconciler = Reconciler::new(registry.clone(), finalizer, sink.clone());
        Self {
            provider,
            registry,
            reconciler,
            sink,
            webhook_url,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn sink(&self) -> &Arc<dyn TaskSink> {
        &self.sink
    }

    /// Start the poll loop and the subscriber keep-alive.
    pub fn start_background(&self, poll_interval: Duration) -> BackgroundTasks {
        BackgroundTasks {
            poller: spawn_poller(self.reconciler.clone(), self.provider.clone(), poll_interval),
            keepalive: self.registry.spawn_keepalive(),
        }
    }

    /// Submit a prompt to the provider and start tracking the task.
    pub async fn submit(&self, prompt: &str) -> Result<TaskRecord, SubmitError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SubmitError::EmptyPrompt);
        }
        let preview: String = prompt.chars().take(50).collect();
        tracing::info!("Creating task: {:?}", preview);

        let created = self
            .provider
            .create_task(prompt, self.webhook_url.as_deref())
            .await?;
        let task_id = created.task_id;

        self.registry.init(&task_id);
        if let Err(e) = self.sink.create(&task_id, prompt).await {
            tracing::error!(task_id = %task_id, "Failed to store new task: {:#}", e);
        }
        tracing::info!(task_id = %task_id, "Task created");

        Ok(self
            .registry
            .get(&task_id)
            .unwrap_or_else(|| TaskRecord::new(task_id)))
    }

    /// Live record first, then the durable one.
    pub async fn lookup(&self, task_id: &str) -> anyhow::Result<Option<TaskLookup>> {
        if let Some(record) = self.registry.get(task_id) {
            return Ok(Some(TaskLookup::Live(record)));
        }
        Ok(self.sink.load(task_id).await?.map(TaskLookup::Stored))
    }

    pub async fn list_recent(&self, limit: usize) -> anyhow::Result<Vec<DurableTask>> {
        self.sink.list_recent(limit).await
    }

    /// Make sure `task_id` is in memory, loading it from storage if needed.
    /// Returns `false` when the id is unknown everywhere.
    pub async fn ensure_live(&self, task_id: &str) -> anyhow::Result<bool> {
        if self.registry.contains(task_id) {
            return Ok(true);
        }
        match self.sink.load(task_id).await? {
            Some(stored) => {
                tracing::debug!(task_id = %task_id, "Hydrating task from storage");
                self.registry.hydrate(stored.into_record());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Attach a new channel subscriber to `task_id`.
    pub fn subscribe(&self, task_id: &str) -> Result<Subscription, RegistryError> {
        let (observer, frames) = ChannelObserver::new(self.registry.config().subscriber_buffer);
        let id = observer.id();
        self.registry.subscribe(task_id, observer)?;
        Ok(Subscription {
            task_id: task_id.to_string(),
            observer: id,
            frames,
        })
    }

    pub fn unsubscribe(&self, task_id: &str, observer: ObserverId) {
        self.registry.unsubscribe(task_id, observer);
    }
}
