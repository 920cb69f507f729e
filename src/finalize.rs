//! Finalization pipeline: fetch the provider's final data, extract the
//! result and settle the task.

use chrono::Utc;
use std::sync::Arc;

use crate::extract;
use crate::provider::TaskProvider;
use crate::registry::TaskRegistry;
use crate::store::{DurableSnapshot, TaskSink};
use crate::task::{LogEntry, TaskPatch, TaskStatus};

pub const COMPLETED_MESSAGE: &str = "Task completed successfully";
pub const EXTRACTION_FAILED: &str = "result extraction failed";

/// How a finalization ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// A result was extracted and the task is `DONE`.
    Completed,
    /// The provider data held no usable result.
    ExtractionFailed,
    /// The final snapshot could not be fetched.
    FetchFailed(String),
    /// The task is not in memory.
    Unknown,
}

#[derive(Clone)]
pub struct Finalizer {
    provider: Arc<dyn TaskProvider>,
    registry: TaskRegistry,
    sink: Arc<dyn TaskSink>,
}

impl Finalizer {
    pub fn new(
        provider: Arc<dyn TaskProvider>,
        registry: TaskRegistry,
        sink: Arc<dyn TaskSink>,
    ) -> Self {
        Self {
            provider,
            registry,
            sink,
        }
    }

    /// Settle a task that the provider reported as finished.
    ///
    /// Always leaves the task terminal, unless another terminal signal got
    /// there first.
    pub async fn finalize(&self, task_id: &str) -> FinalizeOutcome {
        if !self.registry.contains(task_id) {
            return FinalizeOutcome::Unknown;
        }
        tracing::info!(task_id = %task_id, "Fetching final result");

        let (task, logs) = tokio::join!(
            self.provider.get_task(task_id),
            self.provider.get_task_logs(task_id)
        );

        let task = match task {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(task_id = %task_id, "Failed to fetch final task: {}", e);
                let message = e.to_string();
                self.settle(
                    task_id,
                    TaskPatch::status(TaskStatus::Error)
                        .message("Failed to fetch final result")
                        .error(message.clone()),
                );
                self.persist(task_id).await;
                return FinalizeOutcome::FetchFailed(message);
            }
        };

        let logs = match logs {
            Ok(logs) => logs,
            Err(e) => {
                tracing::warn!(task_id = %task_id, "Failed to fetch final logs: {}", e);
                task.embedded_logs().unwrap_or_default()
            }
        };

        self.append_unseen(task_id, &logs);

        match extract::extract(&task, &logs) {
            Ok(outcome) => {
                let summary = outcome.summary();
                if let Some(method) = outcome.report_method {
                    tracing::debug!(task_id = %task_id, ?method, "Decoded structured report");
                }
                self.settle(
                    task_id,
                    TaskPatch::status(TaskStatus::Done)
                        .message(COMPLETED_MESSAGE)
                        .result(outcome)
                        .completed_at(Utc::now()),
                );
                if let Err(e) = self
                    .registry
                    .append_log(task_id, vec![LogEntry::system("system", summary)])
                {
                    tracing::debug!(task_id = %task_id, "Could not append summary: {}", e);
                }
                // Stored logs include the summary.
                self.persist(task_id).await;
                FinalizeOutcome::Completed
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, "No result in provider output: {}", e);
                self.settle(
                    task_id,
                    TaskPatch::status(TaskStatus::Error)
                        .message("Failed to extract valid result")
                        .error(EXTRACTION_FAILED),
                );
                self.persist(task_id).await;
                FinalizeOutcome::ExtractionFailed
            }
        }
    }

    /// Append provider entries the record has not seen yet.
    fn append_unseen(&self, task_id: &str, logs: &[LogEntry]) {
        if let Err(e) = self.registry.append_provider_logs(task_id, logs.to_vec()) {
            tracing::debug!(task_id = %task_id, "Could not append final logs: {}", e);
        }
    }

    fn settle(&self, task_id: &str, patch: TaskPatch) {
        match self.registry.update(task_id, patch) {
            Ok(transition) if transition.status_rejected => {
                tracing::info!(
                    task_id = %task_id,
                    status = %transition.current,
                    "Task already settled; result kept as enrichment"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(task_id = %task_id, "Task vanished during finalization: {}", e);
            }
        }
    }

    async fn persist(&self, task_id: &str) {
        persist(&self.registry, self.sink.as_ref(), task_id).await;
    }
}

/// Write the current record to the sink. Failures are logged, never retried.
pub(crate) async fn persist(registry: &TaskRegistry, sink: &dyn TaskSink, task_id: &str) {
    let Some(record) = registry.get(task_id) else {
        return;
    };
    if let Err(e) = sink.save(task_id, &DurableSnapshot::from_record(&record)).await {
        tracing::error!(task_id = %task_id, "Failed to persist task: {:#}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CreatedTask, ProviderError, ProviderTask};
    use crate::task::LogOrigin;
    use crate::store::MemoryTaskStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticProvider {
        task: Result<ProviderTask, u16>,
        logs: Vec<LogEntry>,
    }

    #[async_trait]
    impl TaskProvider for StaticProvider {
        async fn create_task(
            &self,
            _: &str,
            _: Option<&str>,
        ) -> Result<CreatedTask, ProviderError> {
            Err(ProviderError::http(400, "unused"))
        }

        async fn get_task(&self, _: &str) -> Result<ProviderTask, ProviderError> {
            self.task
                .clone()
                .map_err(|status| ProviderError::http(status, "unavailable"))
        }

        async fn get_task_logs(&self, _: &str) -> Result<Vec<LogEntry>, ProviderError> {
            Ok(self.logs.clone())
        }
    }

    fn setup(provider: StaticProvider) -> (Finalizer, TaskRegistry, Arc<MemoryTaskStore>) {
        let registry = TaskRegistry::default();
        let sink = Arc::new(MemoryTaskStore::new());
        let finalizer = Finalizer::new(Arc::new(provider), registry.clone(), sink.clone());
        (finalizer, registry, sink)
    }

    fn log(message: &str) -> LogEntry {
        LogEntry::from_provider(json!({ "content": message }))
    }

    #[tokio::test]
    async fn test_labeled_logs_complete_the_task() {
        let (finalizer, registry, sink) = setup(StaticProvider {
            task: Ok(serde_json::from_value(json!({"status": "finished"})).unwrap()),
            logs: vec![
                log("navigating"),
                log(concat!(
                    "Claim: Does X\nPricing visible: no\nAI Retrieval: success\n",
                    "Latency: ~3.2s\nFinal Verdict: WORKS"
                )),
            ],
        });
        registry.init("t-1");
        registry.append_log("t-1", vec![log("navigating")]).unwrap();

        assert_eq!(finalizer.finalize("t-1").await, FinalizeOutcome::Completed);

        let record = registry.get("t-1").unwrap();
        assert_eq!(record.status, TaskStatus::Done);
        assert_eq!(record.latest_message, COMPLETED_MESSAGE);
        assert_eq!(record.provider_log_count, 2);
        assert_eq!(record.result.as_ref().unwrap().claim.as_deref(), Some("Does X"));
        // Two provider entries plus the summary.
        assert_eq!(record.log_entries.len(), 3);
        assert_eq!(record.log_entries[2].origin, LogOrigin::System);

        let stored = sink.load("t-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Done);
        assert!(stored.result.is_some());
        assert_eq!(stored.logs.len(), 3);
        assert_eq!(stored.logs[2].origin, LogOrigin::System);
        assert_eq!(stored.logs[2].message, record.log_entries[2].message);
    }

    #[tokio::test]
    async fn test_no_text_is_extraction_failure() {
        let (finalizer, registry, sink) = setup(StaticProvider {
            task: Ok(serde_json::from_value(json!({"status": "finished"})).unwrap()),
            logs: vec![],
        });
        registry.init("t-1");

        assert_eq!(finalizer.finalize("t-1").await, FinalizeOutcome::ExtractionFailed);
        let record = registry.get("t-1").unwrap();
        assert_eq!(record.status, TaskStatus::Error);
        assert_eq!(record.error.as_deref(), Some(EXTRACTION_FAILED));
        assert_eq!(sink.load("t-1").await.unwrap().unwrap().status, TaskStatus::Error);
    }

    #[tokio::test]
    async fn test_fetch_failure_never_leaves_task_finalizing() {
        let (finalizer, registry, _sink) = setup(StaticProvider {
            task: Err(503),
            logs: vec![],
        });
        registry.init("t-1");
        registry
            .update("t-1", TaskPatch::status(TaskStatus::Finalizing))
            .unwrap();

        let outcome = finalizer.finalize("t-1").await;
        assert!(
            matches!(outcome, FinalizeOutcome::FetchFailed(ref m) if m.contains("unavailable"))
        );
        assert_eq!(registry.get("t-1").unwrap().status, TaskStatus::Error);
    }

    #[tokio::test]
    async fn test_unknown_task_is_skipped() {
        let (finalizer, _registry, _sink) = setup(StaticProvider {
            task: Err(404),
            logs: vec![],
        });
        assert_eq!(finalizer.finalize("ghost").await, FinalizeOutcome::Unknown);
    }
}
