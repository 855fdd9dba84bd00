use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use forgebench_store::{IndexValue, Record};

use super::task::{Task, TaskState, TaskType};

/// The type of a clarification question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClarificationType {
    TargetFile,
    SelectOne,
    Confirm,
    FreeText,
}

/// The parked question attached to a task in AWAITING_RESPONSE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clarification {
    #[serde(rename = "type")]
    pub kind: ClarificationType,
    pub question: String,
    pub options: Vec<String>,
    pub context: Option<serde_json::Value>,
}

/// Durable projection of a `Task`, keyed by `(namespace, task_id)` in the
/// durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub namespace: String,
    pub task_id: String,
    pub task_group_id: Option<String>,
    pub session_id: String,
    pub description: String,
    pub state: TaskState,
    pub task_type: TaskType,
    pub clarification: Option<Clarification>,
    pub updated_at: i64,
}

impl QueueItem {
    pub fn from_task(task: &Task, namespace: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            task_id: task.id.clone(),
            task_group_id: None,
            session_id: session_id.into(),
            description: task.description.clone(),
            state: task.state,
            task_type: task.task_type,
            clarification: None,
            updated_at: task.updated_at,
        }
    }

    /// Composite key used for store lookups; the store itself indexes by
    /// `id()` alone, so the namespace is folded into the id to honor the
    /// `(namespace, task_id)` keying the queue is addressed by.
    pub fn key(namespace: &str, task_id: &str) -> String {
        format!("{namespace}:{task_id}")
    }

    /// Reconstruct a `Task` for seeding a freshly started `TaskQueue` on
    /// restart. The durable projection doesn't carry every timestamp a live
    /// `Task` has, so `queued_at`/`started_at` fall back to `updated_at`:
    /// close enough for resuming work, not meant to reproduce history.
    pub fn to_task(&self) -> Task {
        let started_at = (self.state != TaskState::Queued).then_some(self.updated_at);
        Task {
            id: self.task_id.clone(),
            description: self.description.clone(),
            state: self.state,
            task_type: self.task_type,
            queued_at: self.updated_at,
            started_at,
            completed_at: None,
            result_status: None,
            files_modified: Vec::new(),
            error_message: None,
            response_summary: None,
            clarification_question: self.clarification.as_ref().map(|c| c.question.clone()),
            clarification_reason: None,
            user_response: None,
            updated_at: self.updated_at,
            timeout_override_ms: None,
        }
    }
}

impl Record for QueueItem {
    fn id(&self) -> String {
        QueueItem::key(&self.namespace, &self.task_id)
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "queue_items"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::Str(self.state.to_string()));
        fields.insert("session_id".to_string(), IndexValue::Str(self.session_id.clone()));
        fields.insert("namespace".to_string(), IndexValue::Str(self.namespace.clone()));
        if let Some(group) = &self.task_group_id {
            fields.insert("task_group_id".to_string(), IndexValue::Str(group.clone()));
        }
        fields
    }
}
