use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{new_id, IdKind};

/// Tags an `EventRecord` by the subsystem that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    FileChange,
    Executor,
    Task,
    Session,
    Command,
}

/// Append-only record of a state transition, subprocess invocation, or file
/// change. Events form a directed relation graph via `parent_event_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub task_id: Option<String>,
    pub session_id: Option<String>,
    pub executor_id: Option<String>,
    pub parent_event_id: Option<String>,
    pub payload: serde_json::Value,
}

impl EventRecord {
    pub fn new(source: EventSource, payload: serde_json::Value) -> Self {
        Self {
            id: new_id(IdKind::Event),
            timestamp: Utc::now(),
            source,
            task_id: None,
            session_id: None,
            executor_id: None,
            parent_event_id: None,
            payload,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_executor(mut self, executor_id: impl Into<String>) -> Self {
        self.executor_id = Some(executor_id.into());
        self
    }

    pub fn with_parent(mut self, parent_event_id: impl Into<String>) -> Self {
        self.parent_event_id = Some(parent_event_id.into());
        self
    }
}
