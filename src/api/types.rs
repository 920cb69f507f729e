//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::service::TaskLookup;
use crate::store::DurableTask;
use crate::task::{TaskRecord, TaskStatus};

/// Request to submit a new task.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub task_prompt: String,
}

/// Response after submitting a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskResponse {
    pub task_id: String,
    pub status: TaskStatus,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Tasks currently held in memory.
    pub tracked_tasks: usize,
    /// Tracked tasks not yet settled.
    pub active_tasks: usize,
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub limit: Option<usize>,
}

/// A task as returned by `GET /api/tasks/:id`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum TaskResponse {
    Live(TaskRecord),
    Stored(DurableTask),
}

impl From<TaskLookup> for TaskResponse {
    fn from(lookup: TaskLookup) -> Self {
        match lookup {
            TaskLookup::Live(record) => Self::Live(record),
            TaskLookup::Stored(task) => Self::Stored(task),
        }
    }
}
