//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use task_relay::provider::{CreatedTask, ProviderError, ProviderTask, TaskProvider};
use task_relay::store::MemoryTaskStore;
use task_relay::task::LogEntry;
use task_relay::{RegistryConfig, TaskService};

/// In-process provider whose state is driven by the test.
#[derive(Default)]
pub struct FakeProvider {
    pub status: Mutex<String>,
    pub output: Mutex<Option<String>>,
    pub logs: Mutex<Vec<Value>>,
    pub created: AtomicUsize,
    pub task_fetches: AtomicUsize,
    pub callback_urls: Mutex<Vec<Option<String>>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        let provider = Self::default();
        *provider.status.lock() = "created".to_string();
        Arc::new(provider)
    }

    pub fn set_status(&self, status: &str) {
        *self.status.lock() = status.to_string();
    }

    pub fn set_output(&self, output: &str) {
        *self.output.lock() = Some(output.to_string());
    }

    pub fn push_log(&self, message: &str) {
        self.logs.lock().push(json!({ "type": "step", "content": message }));
    }

    pub fn fetches(&self) -> usize {
        self.task_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskProvider for FakeProvider {
    async fn create_task(
        &self,
        _prompt: &str,
        callback_url: Option<&str>,
    ) -> Result<CreatedTask, ProviderError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        self.callback_urls.lock().push(callback_url.map(str::to_string));
        Ok(CreatedTask {
            task_id: format!("bu-{n}"),
        })
    }

    async fn get_task(&self, task_id: &str) -> Result<ProviderTask, ProviderError> {
        self.task_fetches.fetch_add(1, Ordering::SeqCst);
        let status = self.status.lock().clone();
        let output = self.output.lock().clone();
        Ok(serde_json::from_value(json!({
            "id": task_id,
            "status": status,
            "output": output,
        }))
        .map_err(|e| ProviderError::parse(e.to_string()))?)
    }

    async fn get_task_logs(&self, _task_id: &str) -> Result<Vec<LogEntry>, ProviderError> {
        Ok(self
            .logs
            .lock()
            .iter()
            .cloned()
            .map(LogEntry::from_provider)
            .collect())
    }
}

pub fn service(provider: Arc<FakeProvider>) -> (TaskService, Arc<MemoryTaskStore>) {
    let sink = Arc::new(MemoryTaskStore::new());
    let service = TaskService::new(
        provider,
        sink.clone(),
        RegistryConfig::default(),
        Some("https://relay.example.com/api/webhooks/browser-use".to_string()),
    );
    (service, sink)
}

pub fn status_update(task_id: &str, status: &str) -> task_relay::reconcile::WebhookPayload {
    serde_json::from_value(json!({
        "type": "agent.task.status_update",
        "timestamp": "2025-06-01T12:00:00Z",
        "payload": { "task_id": task_id, "status": status }
    }))
    .unwrap()
}
