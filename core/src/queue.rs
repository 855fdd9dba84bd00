//! The Task Queue: a single ordered sequence of tasks, mutated only by
//! `enqueue` (input dispatcher) and `transition` (worker), both serialized
//! under a queue-scoped lock so enqueue never blocks on a running task and
//! the worker never observes a torn state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::domain::{Task, TaskState};
use crate::errors::QueueError;

struct Inner {
    /// Insertion order is enqueue order; `next_queued` scans from the front
    /// so FIFO dequeue order always equals enqueue order.
    order: Vec<String>,
    tasks: HashMap<String, Task>,
}

/// Ordered, lockable collection of tasks for a single session.
pub struct TaskQueue {
    inner: Mutex<Inner>,
    /// Woken on every `enqueue` so a parked `TaskWorker` restarts without
    /// polling: a parked worker is restarted by the next enqueue.
    notify: Arc<Notify>,
    now_ms: fn() -> i64,
}

impl TaskQueue {
    pub fn new(now_ms: fn() -> i64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                order: Vec::new(),
                tasks: HashMap::new(),
            }),
            notify: Arc::new(Notify::new()),
            now_ms,
        }
    }

    pub fn notify_handle(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Populate a freshly constructed queue with tasks recovered from the
    /// durable store, preserving their enqueue order by `queued_at`. Intended
    /// to run once, before the worker starts, so RUNNING (downgraded to
    /// QUEUED) and AWAITING_RESPONSE tasks survive a restart instead of
    /// vanishing into a new empty queue.
    pub async fn seed(&self, mut tasks: Vec<Task>) {
        if tasks.is_empty() {
            return;
        }
        tasks.sort_by_key(|t| t.queued_at);
        let mut inner = self.inner.lock().await;
        for task in tasks {
            debug!(task_id = %task.id, state = %task.state, "TaskQueue::seed: recovered task");
            inner.order.push(task.id.clone());
            inner.tasks.insert(task.id.clone(), task);
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Create a new Task in QUEUED and return its id. Safe to call while the
    /// worker is running.
    pub async fn enqueue(&self, description: impl Into<String>) -> String {
        self.enqueue_with_timeout(description, None).await
    }

    /// Same as `enqueue`, with a caller-supplied deadline that the worker
    /// intersects with the configured hard timeout.
    pub async fn enqueue_with_timeout(&self, description: impl Into<String>, timeout_override_ms: Option<u64>) -> String {
        let task = Task::with_timeout_override(description, (self.now_ms)(), timeout_override_ms);
        let id = task.id.clone();
        debug!(task_id = %id, "TaskQueue::enqueue");

        let mut inner = self.inner.lock().await;
        inner.order.push(id.clone());
        inner.tasks.insert(id.clone(), task);
        drop(inner);

        self.notify.notify_one();
        id
    }

    /// The earliest-enqueued task still in QUEUED, if any.
    pub async fn next_queued(&self) -> Option<Task> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .find(|t| t.state == TaskState::Queued)
            .cloned()
    }

    pub async fn find(&self, task_id: &str) -> Option<Task> {
        self.inner.lock().await.tasks.get(task_id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<Task> {
        let inner = self.inner.lock().await;
        inner.order.iter().filter_map(|id| inner.tasks.get(id)).cloned().collect()
    }

    /// Tasks currently in AWAITING_RESPONSE, used by the broker's implicit
    /// single-target resolution when no explicit task id is given.
    pub async fn awaiting_response(&self) -> Vec<Task> {
        let inner = self.inner.lock().await;
        inner
            .tasks
            .values()
            .filter(|t| t.state == TaskState::AwaitingResponse)
            .cloned()
            .collect()
    }

    /// Atomically apply a transition, enforcing the graph in
    /// `TaskState::can_transition_to`.
    pub async fn transition(&self, task_id: &str, next: TaskState) -> Result<Task, QueueError> {
        let mut inner = self.inner.lock().await;
        let task = inner.tasks.get_mut(task_id).ok_or_else(|| QueueError::UnknownTask {
            task_id: task_id.to_string(),
        })?;
        task.apply_transition(next, (self.now_ms)())?;
        debug!(task_id, to = %next, "TaskQueue::transition");
        Ok(task.clone())
    }

    /// Record an executor's clarification question and set the task
    /// AWAITING_RESPONSE in one atomic step (used by the broker, which needs
    /// both the state change and the question persisted together).
    pub async fn mark_awaiting_response(
        &self,
        task_id: &str,
        question: String,
        reason: Option<String>,
    ) -> Result<Task, QueueError> {
        let mut inner = self.inner.lock().await;
        let task = inner.tasks.get_mut(task_id).ok_or_else(|| QueueError::UnknownTask {
            task_id: task_id.to_string(),
        })?;
        task.clarification_question = Some(question);
        task.clarification_reason = reason;
        task.apply_transition(TaskState::AwaitingResponse, (self.now_ms)())?;
        Ok(task.clone())
    }

    /// Store the user's reply and return the task to RUNNING.
    pub async fn resolve_clarification(&self, task_id: &str, response: String) -> Result<Task, QueueError> {
        let mut inner = self.inner.lock().await;
        let task = inner.tasks.get_mut(task_id).ok_or_else(|| QueueError::UnknownTask {
            task_id: task_id.to_string(),
        })?;
        task.user_response = Some(response);
        task.apply_transition(TaskState::Running, (self.now_ms)())?;
        Ok(task.clone())
    }
}
