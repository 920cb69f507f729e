//! Durable task storage.
//!
//! The engine only writes summaries here and reads them back when a task is
//! no longer in memory. Nothing in this module is ever deleted.

mod sqlite;

pub use sqlite::SqliteTaskStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::task::{LogEntry, LogOrigin, TaskOutcome, TaskRecord, TaskStatus};

/// Fields written to storage when a task changes in a way worth keeping.
#[derive(Debug, Clone, PartialEq)]
pub struct DurableSnapshot {
    pub status: TaskStatus,
    pub result: Option<TaskOutcome>,
    pub error: Option<String>,
    pub logs: Vec<LogEntry>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DurableSnapshot {
    pub fn from_record(record: &TaskRecord) -> Self {
        Self {
            status: record.status,
            result: record.result.clone(),
            error: record.error.clone(),
            logs: record.log_entries.clone(),
            completed_at: record.completed_at,
        }
    }
}

/// A stored task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableTask {
    pub id: String,
    pub prompt: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub logs: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DurableTask {
    fn new(id: &str, prompt: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            prompt: prompt.to_string(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            logs: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Overwrite with `snapshot`, unless that would move a finished task
    /// back to a live status. Returns whether the write happened.
    fn apply(&mut self, snapshot: &DurableSnapshot) -> bool {
        if self.status.is_terminal() && !snapshot.status.is_terminal() {
            return false;
        }
        self.status = snapshot.status;
        self.result = snapshot.result.clone();
        self.error = snapshot.error.clone();
        self.logs = snapshot.logs.clone();
        self.completed_at = snapshot.completed_at;
        self.updated_at = Utc::now();
        true
    }

    /// Rebuild an in-memory record from the stored summary.
    pub fn into_record(self) -> TaskRecord {
        let latest_message = match (&self.status, &self.error) {
            (TaskStatus::Done, _) => "Task completed successfully".to_string(),
            (TaskStatus::Error, Some(error)) => error.clone(),
            _ => format!("Restored from storage ({})", self.status),
        };
        let provider_log_count = self
            .logs
            .iter()
            .filter(|e| e.origin == LogOrigin::Provider)
            .count();
        let mut record = TaskRecord::new(self.id);
        record.status = self.status;
        record.log_entries = self.logs;
        record.provider_log_count = provider_log_count;
        record.latest_message = latest_message;
        record.result = self.result;
        record.error = self.error;
        record.created_at = self.created_at;
        record.updated_at = self.updated_at;
        record.completed_at = self.completed_at;
        record
    }
}

/// Passive durable sink.
#[async_trait]
pub trait TaskSink: Send + Sync {
    /// Record a newly submitted task.
    async fn create(&self, id: &str, prompt: &str) -> anyhow::Result<()>;

    /// Write a snapshot, creating the row if the task was never submitted
    /// through this service. A stored `DONE`/`ERROR` row is never replaced
    /// by a non-terminal snapshot; such writes are dropped.
    async fn save(&self, id: &str, snapshot: &DurableSnapshot) -> anyhow::Result<()>;

    async fn load(&self, id: &str) -> anyhow::Result<Option<DurableTask>>;

    /// Most recently created tasks first.
    async fn list_recent(&self, limit: usize) -> anyhow::Result<Vec<DurableTask>>;
}

/// Sink that keeps everything in memory. Used when no database is configured
/// and in tests.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<String, DurableTask>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskSink for MemoryTaskStore {
    async fn create(&self, id: &str, prompt: &str) -> anyhow::Result<()> {
        self.tasks
            .write()
            .entry(id.to_string())
            .or_insert_with(|| DurableTask::new(id, prompt));
        Ok(())
    }

    async fn save(&self, id: &str, snapshot: &DurableSnapshot) -> anyhow::Result<()> {
        let written = self
            .tasks
            .write()
            .entry(id.to_string())
            .or_insert_with(|| DurableTask::new(id, ""))
            .apply(snapshot);
        if !written {
            tracing::debug!(
                task_id = %id,
                status = %snapshot.status,
                "Kept finished task in store"
            );
        }
        Ok(())
    }

    async fn load(&self, id: &str) -> anyhow::Result<Option<DurableTask>> {
        Ok(self.tasks.read().get(id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> anyhow::Result<Vec<DurableTask>> {
        let mut tasks: Vec<DurableTask> = self.tasks.read().values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks.truncate(limit);
        Ok(tasks)
    }
}
