//! Events streamed to subscribers and their encoded frames.

use serde::Serialize;
use std::sync::Arc;

use crate::task::{LogEntry, TaskOutcome, TaskRecord, TaskStatus};

/// Kind of a frame on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Init,
    Log,
    Logs,
    Update,
    Done,
    Error,
    Heartbeat,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Log => "log",
            Self::Logs => "logs",
            Self::Update => "update",
            Self::Done => "done",
            Self::Error => "error",
            Self::Heartbeat => "heartbeat",
        }
    }
}

/// State of a task as seen by a subscriber that just connected.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload {
    pub task_id: String,
    pub status: TaskStatus,
    pub latest_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub log_count: usize,
}

/// Status/result/error delta.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    pub status: TaskStatus,
    pub latest_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Event produced by the registry for one task.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamEvent {
    Init(SnapshotPayload),
    Log(LogEntry),
    Logs(Vec<LogEntry>),
    Update(UpdatePayload),
    Done(Option<TaskOutcome>),
    Error(ErrorPayload),
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Init(_) => EventKind::Init,
            Self::Log(_) => EventKind::Log,
            Self::Logs(_) => EventKind::Logs,
            Self::Update(_) => EventKind::Update,
            Self::Done(_) => EventKind::Done,
            Self::Error(_) => EventKind::Error,
        }
    }

    pub fn snapshot(record: &TaskRecord) -> Self {
        Self::Init(SnapshotPayload {
            task_id: record.id.clone(),
            status: record.status,
            latest_message: record.latest_message.clone(),
            result: record.result.clone(),
            error: record.error.clone(),
            log_count: record.log_entries.len(),
        })
    }

    pub fn update(record: &TaskRecord) -> Self {
        Self::Update(UpdatePayload {
            status: record.status,
            latest_message: record.latest_message.clone(),
            result: record.result.clone(),
            error: record.error.clone(),
        })
    }

    /// Terminal shorthand for a record in `DONE` or `ERROR`.
    pub fn terminal(record: &TaskRecord) -> Option<Self> {
        match record.status {
            TaskStatus::Done => Some(Self::Done(record.result.clone())),
            TaskStatus::Error => Some(Self::Error(ErrorPayload {
                message: record
                    .error
                    .clone()
                    .unwrap_or_else(|| record.latest_message.clone()),
            })),
            _ => None,
        }
    }
}

/// An event serialized once, shared by every subscriber it is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: EventKind,
    /// `{"type": ..., "data": ...}` JSON; empty for heartbeats.
    pub payload: Arc<str>,
}

impl Frame {
    pub fn encode(event: &StreamEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: event.kind(),
            payload: serde_json::to_string(event)?.into(),
        })
    }

    pub fn heartbeat() -> Self {
        Self {
            kind: EventKind::Heartbeat,
            payload: Arc::from(""),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.kind == EventKind::Heartbeat
    }
}
