//! Task domain types shared by the broker adapter, worker runtime, and HTTP
//! surface.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// The closed set of registered task kinds.
///
/// Unknown kinds are rejected at enqueue time; the open handler registry in
/// [`crate::worker::Registry`] dispatches on the string form at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Simple in-process task used to exercise the engine.
    Demo,
    /// Delegation to a remote executor over a streaming gRPC call.
    GrpcTask,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::Demo, TaskKind::GrpcTask];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Demo => "demo",
            TaskKind::GrpcTask => "grpc_task",
        }
    }

    pub fn parse(s: &str) -> Option<TaskKind> {
        match s {
            "demo" => Some(TaskKind::Demo),
            "grpc_task" => Some(TaskKind::GrpcTask),
            _ => None,
        }
    }

    /// The queue a kind is routed to when the request does not name one.
    pub fn home_queue(&self) -> &'static str {
        "default"
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a task as reported by the broker.
///
/// Transitions are owned by the broker; `Archived` and `Completed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Active,
    Scheduled,
    Retry,
    Archived,
    Completed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Active => "active",
            TaskState::Scheduled => "scheduled",
            TaskState::Retry => "retry",
            TaskState::Archived => "archived",
            TaskState::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<TaskState> {
        match s {
            "pending" => Some(TaskState::Pending),
            "active" => Some(TaskState::Active),
            "scheduled" => Some(TaskState::Scheduled),
            "retry" => Some(TaskState::Retry),
            "archived" => Some(TaskState::Archived),
            "completed" => Some(TaskState::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Archived | TaskState::Completed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task to be enqueued.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Stable identity; a fresh UUIDv4 is generated when absent.
    pub id: Option<String>,
    pub kind: TaskKind,
    /// Opaque JSON payload bytes, interpreted by the kind's handler.
    pub payload: Vec<u8>,
    /// Free-form metadata propagated to the handler.
    pub metadata: HashMap<String, String>,
}

/// Routing and retry options applied at enqueue time.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub queue: String,
    pub max_retries: u32,
    pub timeout: Duration,
    /// Absolute dispatch time; `None` means immediate. Past times are clamped
    /// to immediate.
    pub process_at: Option<DateTime<Utc>>,
    /// Uniqueness window: while live, a second enqueue of the same
    /// (kind, queue, payload) fails with `AlreadyExists`.
    pub unique: Option<Duration>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            queue: "default".to_owned(),
            max_retries: 3,
            timeout: Duration::from_secs(30 * 60),
            process_at: None,
            unique: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kind_roundtrips_through_str() {
        for kind in TaskKind::ALL {
            assert_eq!(TaskKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TaskKind::parse("no_such_kind"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Archived.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Retry.is_terminal());
    }

    #[test]
    fn state_parse_rejects_unknown() {
        assert_eq!(TaskState::parse("running"), None);
        assert_eq!(TaskState::parse("retry"), Some(TaskState::Retry));
    }

    #[test]
    fn default_options_route_to_default_queue() {
        let opts = EnqueueOptions::default();
        assert_eq!(opts.queue, "default");
        assert_eq!(opts.max_retries, 3);
        assert!(opts.process_at.is_none());
    }
}
