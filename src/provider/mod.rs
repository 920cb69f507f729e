//! Task-execution provider client.
//!
//! The engine only needs three calls from the provider; they sit behind the
//! [`TaskProvider`] trait so the reconciler and finalizer can be driven by a
//! fake in tests. [`BrowserUseClient`] is the HTTP implementation.

mod browser_use;
mod error;

pub use browser_use::{BrowserUseClient, DEFAULT_BASE_URL};
pub use error::{ProviderError, ProviderErrorKind};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::task::LogEntry;

/// Provider statuses that mean the task finished and a result can be fetched.
pub const COMPLETED_STATUSES: [&str; 3] = ["finished", "completed", "done"];

/// Provider statuses that mean the task ended without a result.
pub const FAILED_STATUSES: [&str; 3] = ["failed", "error", "stopped"];

/// Snapshot of a task as reported by the provider.
///
/// Only the fields the engine reads are typed; the rest is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Direct answer, when the provider boxes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<Value>>,
    /// Generic human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProviderTask {
    /// Lower-cased provider status, empty when absent.
    pub fn status(&self) -> String {
        self.status.as_deref().unwrap_or_default().trim().to_ascii_lowercase()
    }

    pub fn is_completed(&self) -> bool {
        COMPLETED_STATUSES.contains(&self.status().as_str())
    }

    pub fn is_failed(&self) -> bool {
        FAILED_STATUSES.contains(&self.status().as_str())
    }

    /// Direct output as text. Non-string outputs are rendered as JSON.
    pub fn output_text(&self) -> Option<String> {
        match self.output.as_ref()? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Logs embedded in the snapshot, converted to entries.
    pub fn embedded_logs(&self) -> Option<Vec<LogEntry>> {
        self.logs
            .as_ref()
            .map(|logs| logs.iter().cloned().map(LogEntry::from_provider).collect())
    }
}

/// Identifier returned by task creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTask {
    pub task_id: String,
}

/// Operations the engine consumes from the execution provider.
///
/// Every call may fail transiently; callers treat a failure as "no update
/// this cycle".
#[async_trait]
pub trait TaskProvider: Send + Sync {
    /// Submit a task, optionally asking the provider to push status updates
    /// to `callback_url`.
    async fn create_task(
        &self,
        prompt: &str,
        callback_url: Option<&str>,
    ) -> Result<CreatedTask, ProviderError>;

    /// Fetch the current task snapshot.
    async fn get_task(&self, task_id: &str) -> Result<ProviderTask, ProviderError>;

    /// Fetch the full, append-only log list of a task.
    async fn get_task_logs(&self, task_id: &str) -> Result<Vec<LogEntry>, ProviderError>;
}
