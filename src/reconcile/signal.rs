//! Canonical signals and the adapters that produce them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ReconcileError;
use crate::provider::ProviderTask;
use crate::task::{LogEntry, TaskStatus};

pub const STATUS_UPDATE_EVENT: &str = "agent.task.status_update";
pub const TEST_EVENT: &str = "test";

/// Body pushed by the provider to the webhook endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<WebhookBody>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WebhookPayload {
    pub fn is_test(&self) -> bool {
        self.event_type == TEST_EVENT
    }
}

/// One poll observation of a task.
#[derive(Debug, Clone)]
pub struct PollSample {
    pub task: ProviderTask,
    /// Full provider log list, when it was fetched.
    pub logs: Option<Vec<LogEntry>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    Webhook,
    Poll,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalKind {
    /// The task is (still) making progress.
    Progress {
        status: TaskStatus,
        message: Option<String>,
    },
    /// The provider finished; the result must be fetched.
    Completed,
    /// The provider ended the task without a result.
    Failed { message: String, error: String },
    /// The provider's full log list as observed; only entries past the
    /// record's cursor are appended.
    Logs(Vec<LogEntry>),
}

/// A normalised observation about one task, whatever channel it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub task_id: String,
    pub source: SignalSource,
    pub kind: SignalKind,
}

impl Signal {
    pub fn new(task_id: impl Into<String>, source: SignalSource, kind: SignalKind) -> Self {
        Self {
            task_id: task_id.into(),
            source,
            kind,
        }
    }

    /// Translate a webhook body.
    ///
    /// `Ok(None)` means the event carries nothing to reconcile (test events,
    /// unknown event types, status updates without a body).
    pub fn from_webhook(payload: &WebhookPayload) -> Result<Option<Self>, ReconcileError> {
        if payload.event_type != STATUS_UPDATE_EVENT {
            return Ok(None);
        }
        let Some(body) = payload.payload.as_ref() else {
            return Ok(None);
        };
        let task_id = body
            .task_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(ReconcileError::MissingTaskId)?;

        let status = body.status.as_deref().unwrap_or_default();
        let message = format!("Event: {} - {}", payload.event_type, status);
        let kind = match status {
            "finished" => SignalKind::Completed,
            "stopped" => SignalKind::Failed {
                message,
                error: "Task stopped by provider".to_string(),
            },
            _ => SignalKind::Progress {
                status: TaskStatus::Running,
                message: Some(message),
            },
        };
        Ok(Some(Self::new(task_id, SignalSource::Webhook, kind)))
    }

    /// Translate a poll sample.
    pub fn from_poll(task_id: &str, sample: PollSample) -> Vec<Self> {
        let poll = |kind| Self::new(task_id, SignalSource::Poll, kind);

        if sample.task.is_completed() {
            return vec![poll(SignalKind::Completed)];
        }
        if sample.task.is_failed() {
            return vec![poll(SignalKind::Failed {
                message: "Task failed".to_string(),
                error: "Task reported as failed by Browser Use API".to_string(),
            })];
        }

        let mut signals = vec![poll(SignalKind::Progress {
            status: TaskStatus::Running,
            message: None,
        })];
        let logs = sample.logs.or_else(|| sample.task.embedded_logs());
        if let Some(logs) = logs.filter(|l| !l.is_empty()) {
            signals.push(poll(SignalKind::Logs(logs)));
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn webhook(body: Value) -> WebhookPayload {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_webhook_status_mapping() {
        let kind = |status: &str| {
            let payload = webhook(json!({
                "type": STATUS_UPDATE_EVENT,
                "payload": {"task_id": "t-1", "status": status}
            }));
            Signal::from_webhook(&payload).unwrap().unwrap().kind
        };

        assert!(matches!(
            kind("started"),
            SignalKind::Progress { status: TaskStatus::Running, .. }
        ));
        assert_eq!(kind("finished"), SignalKind::Completed);
        assert!(matches!(kind("stopped"), SignalKind::Failed { .. }));
        // Unknown vocabulary fails open.
        assert!(matches!(
            kind("paused"),
            SignalKind::Progress { status: TaskStatus::Running, .. }
        ));
    }

    #[test]
    fn test_webhook_without_task_id_is_rejected() {
        let payload = webhook(json!({
            "type": STATUS_UPDATE_EVENT,
            "payload": {"status": "started"}
        }));
        assert_eq!(Signal::from_webhook(&payload), Err(ReconcileError::MissingTaskId));
    }

    #[test]
    fn test_non_status_events_are_ignored() {
        let test = webhook(json!({"type": "test", "payload": {"test": "ok"}}));
        assert!(test.is_test());
        assert_eq!(Signal::from_webhook(&test), Ok(None));

        let other = webhook(json!({"type": "agent.task.created", "payload": {"task_id": "t"}}));
        assert_eq!(Signal::from_webhook(&other), Ok(None));
    }

    #[test]
    fn test_poll_reports_the_full_log_list() {
        let logs: Vec<LogEntry> = (0..5)
            .map(|i| LogEntry::from_provider(json!({ "content": format!("step {i}") })))
            .collect();
        let sample = PollSample {
            task: serde_json::from_value(json!({"status": "running"})).unwrap(),
            logs: Some(logs),
        };

        let signals = Signal::from_poll("t-1", sample);
        assert_eq!(signals.len(), 2);
        match &signals[1].kind {
            SignalKind::Logs(observed) => {
                assert_eq!(observed.len(), 5);
                assert_eq!(observed[0].message, "step 0");
            }
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[test]
    fn test_poll_terminal_statuses() {
        let sample = |status: &str| PollSample {
            task: serde_json::from_value(json!({ "status": status })).unwrap(),
            logs: None,
        };
        assert_eq!(Signal::from_poll("t", sample("completed"))[0].kind, SignalKind::Completed);
        assert!(matches!(
            Signal::from_poll("t", sample("failed"))[0].kind,
            SignalKind::Failed { .. }
        ));
    }

    #[test]
    fn test_poll_falls_back_to_embedded_logs() {
        let sample = PollSample {
            task: serde_json::from_value(json!({
                "status": "running",
                "logs": [{"content": "a"}, {"content": "b"}]
            }))
            .unwrap(),
            logs: None,
        };
        let signals = Signal::from_poll("t", sample);
        assert!(matches!(&signals[1].kind, SignalKind::Logs(d) if d.len() == 2));
    }

    #[test]
    fn test_poll_without_logs_only_reports_progress() {
        let sample = PollSample {
            task: serde_json::from_value(json!({"status": "running"})).unwrap(),
            logs: Some(Vec::new()),
        };
        assert_eq!(Signal::from_poll("t", sample).len(), 1);
    }
}
