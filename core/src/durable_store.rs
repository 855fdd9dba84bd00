//! The Durable Queue Store: a thin wrapper over `forgebench_store::Store<QueueItem>`
//! adding restart recovery semantics.

use std::sync::Arc;

use forgebench_store::{Filter, Store};
use tracing::{debug, info, warn};

use crate::domain::{Clarification, QueueItem, Task, TaskState};

/// Persists `QueueItem` projections and recovers them across restarts.
/// Writes are best-effort from the caller's point of view: a write failure
/// is logged via `put_degraded` and never fails the task.
pub struct DurableStore {
    store: Arc<Store<QueueItem>>,
    namespace: String,
}

impl DurableStore {
    pub fn open(state_dir: impl AsRef<std::path::Path>, namespace: impl Into<String>) -> Result<Self, forgebench_store::StoreError> {
        let store = Store::open(state_dir)?;
        Ok(Self {
            store: Arc::new(store),
            namespace: namespace.into(),
        })
    }

    pub fn enqueue(&self, task: &Task, session_id: &str) {
        let item = QueueItem::from_task(task, self.namespace.clone(), session_id);
        self.store.put_degraded(item);
    }

    pub fn set_awaiting_response(&self, task: &Task, clarification: Clarification) {
        let mut item = QueueItem::from_task(task, self.namespace.clone(), "");
        item.clarification = Some(clarification);
        self.store.put_degraded(item);
    }

    pub fn update_status(&self, task: &Task, session_id: &str) {
        let mut item = QueueItem::from_task(task, self.namespace.clone(), session_id);
        if task.state != TaskState::AwaitingResponse {
            item.clarification = None;
        }
        self.store.put_degraded(item);
    }

    pub fn get_item(&self, task_id: &str) -> Option<QueueItem> {
        self.store.get(&QueueItem::key(&self.namespace, task_id))
    }

    pub fn get_all_items(&self) -> Vec<QueueItem> {
        self.store.query(&[Filter::eq("namespace", self.namespace.clone())])
    }

    /// Scan for non-terminal items left over from a crashed run: downgrade
    /// RUNNING to QUEUED, leave AWAITING_RESPONSE untouched so the broker
    /// doesn't re-prompt.
    pub fn recover_on_restart(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        for mut item in self.get_all_items() {
            match item.state {
                TaskState::Running => {
                    info!(task_id = %item.task_id, "recovering RUNNING task as QUEUED after restart");
                    item.state = TaskState::Queued;
                    self.store.put_degraded(item);
                    report.downgraded_running += 1;
                }
                TaskState::AwaitingResponse => {
                    debug!(task_id = %item.task_id, "preserving AWAITING_RESPONSE task across restart");
                    report.preserved_awaiting += 1;
                }
                TaskState::Queued => {
                    report.queued += 1;
                }
                _ => {}
            }
        }

        report
    }

    /// Bulk-recover QUEUED/RUNNING items older than `max_age_ms`.
    pub fn recover_stale_tasks(&self, now_ms: i64, max_age_ms: i64) -> usize {
        let mut recovered = 0;
        for mut item in self.get_all_items() {
            let is_stale = matches!(item.state, TaskState::Queued | TaskState::Running) && now_ms - item.updated_at > max_age_ms;
            if is_stale {
                warn!(task_id = %item.task_id, age_ms = now_ms - item.updated_at, "recovering stale task");
                item.state = TaskState::Queued;
                self.store.put_degraded(item);
                recovered += 1;
            }
        }
        recovered
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryReport {
    pub downgraded_running: usize,
    pub preserved_awaiting: usize,
    pub queued: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use tempfile::TempDir;

    fn sample_task(state: TaskState) -> Task {
        let mut task = Task::new("do a thing", 100);
        task.task_type = TaskType::Implementation;
        if state != TaskState::Queued {
            task.apply_transition(TaskState::Running, 100).unwrap();
        }
        if !matches!(state, TaskState::Queued | TaskState::Running) {
            task.apply_transition(state, 200).unwrap();
        }
        task
    }

    #[test]
    fn restart_downgrades_running_to_queued() {
        let temp = TempDir::new().unwrap();
        let store = DurableStore::open(temp.path(), "default").unwrap();
        let task = sample_task(TaskState::Running);
        store.enqueue(&task, "sess_1");

        let report = store.recover_on_restart();
        assert_eq!(report.downgraded_running, 1);

        let item = store.get_item(&task.id).unwrap();
        assert_eq!(item.state, TaskState::Queued);
    }

    #[test]
    fn restart_preserves_awaiting_response() {
        let temp = TempDir::new().unwrap();
        let store = DurableStore::open(temp.path(), "default").unwrap();
        let mut task = sample_task(TaskState::Running);
        task.apply_transition(TaskState::AwaitingResponse, 150).unwrap();
        store.set_awaiting_response(
            &task,
            Clarification {
                kind: crate::domain::ClarificationType::FreeText,
                question: "Which format?".to_string(),
                options: vec![],
                context: None,
            },
        );

        let report = store.recover_on_restart();
        assert_eq!(report.preserved_awaiting, 1);

        let item = store.get_item(&task.id).unwrap();
        assert_eq!(item.state, TaskState::AwaitingResponse);
        assert!(item.clarification.is_some());
    }

    #[test]
    fn stale_queued_task_is_recovered() {
        let temp = TempDir::new().unwrap();
        let store = DurableStore::open(temp.path(), "default").unwrap();
        let task = sample_task(TaskState::Queued);
        store.enqueue(&task, "sess_1");

        let recovered = store.recover_stale_tasks(task.queued_at + 1_000_000, 3_600_000);
        assert_eq!(recovered, 1);
    }
}
