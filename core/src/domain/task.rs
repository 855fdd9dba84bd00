use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use forgebench_store::{IndexValue, Record};

use super::id::{new_id, IdKind};

/// A task's position in its lifecycle. Terminal states (`Complete`,
/// `Incomplete`, `Error`) are irreversible for the remainder of the task's
/// life; see `TaskState::can_transition_to` for the complete graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Queued,
    Running,
    AwaitingResponse,
    Complete,
    Incomplete,
    Error,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Incomplete | TaskState::Error)
    }

    /// The complete transition graph. Self-transitions and any transition
    /// out of a terminal state are always forbidden.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        if self == next || self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Queued, Running)
                | (Running, Complete)
                | (Running, Incomplete)
                | (Running, Error)
                | (Running, AwaitingResponse)
                | (AwaitingResponse, Running)
                | (AwaitingResponse, Error)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Queued => "QUEUED",
            TaskState::Running => "RUNNING",
            TaskState::AwaitingResponse => "AWAITING_RESPONSE",
            TaskState::Complete => "COMPLETE",
            TaskState::Incomplete => "INCOMPLETE",
            TaskState::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// Whether a task is expected to leave observable file-system effects.
/// `ReadInfo` tasks may legitimately terminate COMPLETE without touching
/// any files; `Implementation` tasks may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    ReadInfo,
    Implementation,
}

impl TaskType {
    /// Infer task type from the verbatim prompt text. Mirrors the source's
    /// heuristic classification: a handful of read-oriented verbs route to
    /// `ReadInfo`, everything else defaults to `Implementation` since an
    /// under-verified task is safer than an under-scrutinized one.
    pub fn infer(description: &str) -> Self {
        const READ_VERBS: &[&str] = &[
            "explain", "describe", "list", "show", "what", "where", "why", "how", "summarize", "read",
        ];
        let lower = description.to_lowercase();
        let first_word = lower.split_whitespace().next().unwrap_or("");
        if READ_VERBS.contains(&first_word) {
            TaskType::ReadInfo
        } else {
            TaskType::Implementation
        }
    }
}

/// A single unit of work dispatched to an executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub state: TaskState,
    pub task_type: TaskType,
    pub queued_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub result_status: Option<String>,
    pub files_modified: Vec<String>,
    pub error_message: Option<String>,
    pub response_summary: Option<String>,
    pub clarification_question: Option<String>,
    pub clarification_reason: Option<String>,
    pub user_response: Option<String>,
    pub updated_at: i64,
    /// Caller-supplied deadline, e.g. batch mode's `--timeout-ms`; intersected
    /// with the configured hard timeout at dispatch, never widening it.
    #[serde(default)]
    pub timeout_override_ms: Option<u64>,
}

impl Task {
    pub fn new(description: impl Into<String>, now_ms: i64) -> Self {
        Self::with_timeout_override(description, now_ms, None)
    }

    pub fn with_timeout_override(description: impl Into<String>, now_ms: i64, timeout_override_ms: Option<u64>) -> Self {
        let description = description.into();
        let task_type = TaskType::infer(&description);
        debug!(?task_type, "Task::new: inferred task type");
        Self {
            id: new_id(IdKind::Task),
            description,
            state: TaskState::Queued,
            task_type,
            queued_at: now_ms,
            started_at: None,
            completed_at: None,
            result_status: None,
            files_modified: Vec::new(),
            error_message: None,
            response_summary: None,
            clarification_question: None,
            clarification_reason: None,
            user_response: None,
            updated_at: now_ms,
            timeout_override_ms,
        }
    }

    /// Apply a transition, enforcing the graph in `TaskState::can_transition_to`
    /// and the `started_at`/`completed_at` invariants.
    pub fn apply_transition(&mut self, next: TaskState, now_ms: i64) -> Result<(), crate::errors::QueueError> {
        if !self.state.can_transition_to(next) {
            return Err(crate::errors::QueueError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }

        if self.started_at.is_none() && next != TaskState::Queued {
            self.started_at = Some(now_ms);
        }
        if next.is_terminal() {
            self.completed_at = Some(now_ms);
        }
        self.state = next;
        self.updated_at = now_ms;
        debug!(task_id = %self.id, to = %next, "Task::apply_transition");
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

impl Record for Task {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "tasks"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("state".to_string(), IndexValue::Str(self.state.to_string()));
        fields.insert("task_type".to_string(), IndexValue::Str(format!("{:?}", self.task_type)));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_to_running_is_allowed() {
        assert!(TaskState::Queued.can_transition_to(TaskState::Running));
    }

    #[test]
    fn self_transition_is_forbidden() {
        assert!(!TaskState::Running.can_transition_to(TaskState::Running));
    }

    #[test]
    fn terminal_to_anything_is_forbidden() {
        assert!(!TaskState::Complete.can_transition_to(TaskState::Running));
        assert!(!TaskState::Error.can_transition_to(TaskState::Queued));
    }

    #[test]
    fn awaiting_response_returns_to_running_or_errors() {
        assert!(TaskState::AwaitingResponse.can_transition_to(TaskState::Running));
        assert!(TaskState::AwaitingResponse.can_transition_to(TaskState::Error));
        assert!(!TaskState::AwaitingResponse.can_transition_to(TaskState::Complete));
    }

    #[test]
    fn started_at_set_on_leaving_queued() {
        let mut task = Task::new("do a thing", 100);
        assert!(task.started_at.is_none());
        task.apply_transition(TaskState::Running, 200).unwrap();
        assert_eq!(task.started_at, Some(200));
    }

    #[test]
    fn completed_at_set_only_on_terminal() {
        let mut task = Task::new("do a thing", 100);
        task.apply_transition(TaskState::Running, 200).unwrap();
        assert!(task.completed_at.is_none());
        task.apply_transition(TaskState::Complete, 300).unwrap();
        assert_eq!(task.completed_at, Some(300));
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut task = Task::new("do a thing", 100);
        let err = task.apply_transition(TaskState::Complete, 200).unwrap_err();
        assert!(matches!(err, crate::errors::QueueError::InvalidTransition { .. }));
    }

    #[test]
    fn task_type_inference() {
        assert_eq!(TaskType::infer("explain the auth flow"), TaskType::ReadInfo);
        assert_eq!(TaskType::infer("Create a file README.md"), TaskType::Implementation);
    }
}
