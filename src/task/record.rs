//! In-memory task record, log entries and partial updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::outcome::TaskOutcome;
use super::status::TaskStatus;

/// Where a log entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOrigin {
    /// Reported by the execution provider (webhook or poll).
    Provider,
    /// Written by this service (e.g. the completion summary).
    System,
}

/// One entry of a task's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub message: String,
    #[serde(default)]
    pub raw_payload: Value,
    pub origin: LogOrigin,
}

impl LogEntry {
    /// Build a system entry with no raw payload.
    pub fn system(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            category: category.into(),
            message: message.into(),
            raw_payload: Value::Null,
            origin: LogOrigin::System,
        }
    }

    /// Build an entry from a raw provider log item.
    ///
    /// Providers are inconsistent about field names, so the usual suspects are
    /// tried in order. The raw value is always kept.
    pub fn from_provider(raw: Value) -> Self {
        let field = |names: &[&str]| -> Option<String> {
            names.iter().find_map(|name| match raw.get(*name) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                _ => None,
            })
        };

        let timestamp = field(&["timestamp", "created_at", "createdAt", "time"])
            .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let category =
            field(&["type", "category", "level", "kind"]).unwrap_or_else(|| "log".to_string());
        let message = match &raw {
            Value::String(s) => s.clone(),
            _ => field(&["content", "message", "msg", "text"]).unwrap_or_default(),
        };

        Self {
            timestamp,
            category,
            message,
            raw_payload: raw,
            origin: LogOrigin::Provider,
        }
    }
}

/// Authoritative in-memory state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    pub log_entries: Vec<LogEntry>,
    /// Number of provider-originated entries; the poll delta cursor.
    pub provider_log_count: usize,
    pub latest_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: TaskStatus::Pending,
            log_entries: Vec::new(),
            provider_log_count: 0,
            latest_message: "Task initialized".to_string(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Merge a patch into the record.
    ///
    /// A status that would move backwards (or out of a terminal state) is
    /// dropped; the remaining fields of the patch still apply.
    pub fn apply(&mut self, patch: TaskPatch) -> Transition {
        let previous = self.status;
        let mut status_rejected = false;

        if let Some(next) = patch.status {
            if previous.can_advance_to(next) {
                self.status = next;
            } else {
                status_rejected = true;
            }
        }
        if let Some(message) = patch.latest_message {
            self.latest_message = message;
        }
        if let Some(result) = patch.result {
            self.result = Some(result);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = Some(completed_at);
        }
        if self.status.is_terminal() && !previous.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        self.updated_at = Utc::now();

        Transition {
            previous,
            current: self.status,
            status_rejected,
        }
    }

    /// Append entries, returning how many were added.
    pub fn append(&mut self, entries: &[LogEntry]) -> usize {
        self.provider_log_count += entries
            .iter()
            .filter(|e| e.origin == LogOrigin::Provider)
            .count();
        self.log_entries.extend_from_slice(entries);
        if !entries.is_empty() {
            self.updated_at = Utc::now();
        }
        entries.len()
    }
}

/// Result of applying a [`TaskPatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: TaskStatus,
    pub current: TaskStatus,
    /// The patch carried a status that was not allowed.
    pub status_rejected: bool,
}

impl Transition {
    pub fn status_changed(&self) -> bool {
        self.previous != self.current
    }

    pub fn became_terminal(&self) -> bool {
        !self.previous.is_terminal() && self.current.is_terminal()
    }
}

/// Partial update merged into a [`TaskRecord`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub latest_message: Option<String>,
    pub result: Option<TaskOutcome>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.latest_message = Some(message.into());
        self
    }

    pub fn result(mut self, result: TaskOutcome) -> Self {
        self.result = Some(result);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }
}
