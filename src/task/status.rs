//! Canonical task lifecycle states.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a tracked task.
///
/// Ordered by terminality: `Pending < Running < Finalizing < {Done, Error}`.
/// `Done` and `Error` share the highest rank and nothing leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Finalizing,
    Done,
    Error,
}

impl TaskStatus {
    /// Position in the terminality order.
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Finalizing => 2,
            Self::Done | Self::Error => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Whether a record currently in `self` may move to `next`.
    ///
    /// Same-state writes are allowed (they are no-ops for the status field);
    /// backwards moves and any move out of a terminal state are not.
    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        if self == next {
            return true;
        }
        !self.is_terminal() && next.rank() >= self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Finalizing => "FINALIZING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }

    /// Parse the canonical upper-case name (as written to the durable store).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "FINALIZING" => Some(Self::Finalizing),
            "DONE" => Some(Self::Done),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Finalizing,
        TaskStatus::Done,
        TaskStatus::Error,
    ];

    #[test]
    fn test_terminal_states_never_advance() {
        for from in [TaskStatus::Done, TaskStatus::Error] {
            for to in ALL {
                if to != from {
                    assert!(!from.can_advance_to(to), "{from} -> {to}");
                }
            }
        }
    }

    #[test]
    fn test_forward_moves_allowed() {
        assert!(TaskStatus::Pending.can_advance_to(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_advance_to(TaskStatus::Done));
        assert!(TaskStatus::Running.can_advance_to(TaskStatus::Finalizing));
        assert!(TaskStatus::Finalizing.can_advance_to(TaskStatus::Error));
        assert!(!TaskStatus::Finalizing.can_advance_to(TaskStatus::Running));
    }

    #[test]
    fn test_round_trip_names() {
        for status in ALL {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert_eq!(TaskStatus::parse("started"), None);
    }
}
