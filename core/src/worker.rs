//! The Task Worker: a single cooperative loop driving at most one RUNNING
//! task at a time through the Supervisor, translating its outcome into a
//! terminal or AWAITING_RESPONSE transition and emitting the immediate
//! summary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::clarification::{BrokerResponseHandle, ClarificationBroker};
use crate::domain::{EventRecord, EventSource, EvidenceRecord, Task, TaskState};
use crate::durable_store::DurableStore;
use crate::eventlog::EventBus;
use crate::queue::TaskQueue;
use crate::redact::Redactor;
use crate::supervisor::{ExecutorRequest, ResponseHandle, Supervisor, SupervisorOutcome};
use crate::verification::{self, Snapshot};

/// The four-or-five-line block emitted on every terminal transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmediateSummary {
    pub lines: Vec<String>,
}

impl ImmediateSummary {
    pub fn complete(task_id: &str) -> Self {
        Self {
            lines: vec![
                "RESULT: COMPLETE".to_string(),
                format!("TASK: {task_id}"),
                "NEXT: (none)".to_string(),
                format!("HINT: /logs {task_id}"),
            ],
        }
    }

    pub fn non_complete(result: &str, task_id: &str, reason: Option<&str>) -> Self {
        Self {
            lines: vec![
                format!("RESULT: {result}"),
                format!("TASK: {task_id}"),
                "NEXT: see /logs for detail".to_string(),
                format!("WHY: {}", reason.unwrap_or("(unknown)")),
                format!("HINT: /logs {task_id}"),
            ],
        }
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

pub struct TaskWorker {
    queue: Arc<TaskQueue>,
    supervisor: Arc<Supervisor>,
    broker: ClarificationBroker,
    durable_store: Arc<DurableStore>,
    events: Arc<EventBus>,
    redactor: Arc<Redactor>,
    verification_root: PathBuf,
    session_id: String,
    notify: Arc<Notify>,
    now_ms: fn() -> i64,
}

impl TaskWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<TaskQueue>,
        supervisor: Arc<Supervisor>,
        broker: ClarificationBroker,
        durable_store: Arc<DurableStore>,
        events: Arc<EventBus>,
        redactor: Arc<Redactor>,
        verification_root: PathBuf,
        session_id: String,
        notify: Arc<Notify>,
        now_ms: fn() -> i64,
    ) -> Self {
        Self {
            queue,
            supervisor,
            broker,
            durable_store,
            events,
            redactor,
            verification_root,
            session_id,
            notify,
            now_ms,
        }
    }

    /// Run until `shutdown` fires. On shutdown the worker finishes its
    /// current task (without forcing a terminal transition) and exits.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                debug!("TaskWorker::run: shutdown observed, exiting");
                return;
            }

            match self.queue.next_queued().await {
                Some(task) => {
                    self.drive(task).await;
                }
                None => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn drive(&self, task: Task) {
        let task_id = task.id.clone();
        info!(task_id = %task_id, "TaskWorker::drive: starting task");

        let task = match self.queue.transition(&task_id, TaskState::Running).await {
            Ok(t) => t,
            Err(err) => {
                debug!(task_id = %task_id, error = %err, "TaskWorker::drive: failed to start task");
                return;
            }
        };
        self.durable_store.update_status(&task, &self.session_id);

        let before = verification::snapshot(&self.verification_root);

        let request = ExecutorRequest::new(
            self.verification_root.display().to_string(),
            self.verification_root.display().to_string(),
            task.description.clone(),
            task.task_type,
        );

        let deadline_override = task.timeout_override_ms.map(Duration::from_millis);
        let responder: Arc<dyn ResponseHandle> = Arc::new(BrokerResponseHandle::new(self.broker.clone(), task.id.clone()));
        let outcome = self.supervisor.run(request, task.task_type, deadline_override, responder).await;

        match outcome {
            Ok(SupervisorOutcome::Ok { stdout, stderr }) => {
                self.finish_ok(&task, before, stdout, stderr).await;
            }
            Ok(SupervisorOutcome::Timeout { stdout, stderr }) => {
                self.finish_incomplete(&task, "executor_timeout", stdout, stderr).await;
            }
            Ok(SupervisorOutcome::Blocked { reason, stdout, stderr }) => {
                self.finish_incomplete(&task, &reason, stdout, stderr).await;
            }
            Ok(SupervisorOutcome::Error { exit_code, stdout, stderr }) => {
                self.finish_error(&task, exit_code, stdout, stderr).await;
            }
            Err(err) => {
                self.finish_error(&task, None, String::new(), err.to_string()).await;
            }
        }
    }

    async fn finish_ok(&self, task: &Task, before: Snapshot, stdout: String, stderr: String) {
        let after = verification::snapshot(&self.verification_root);
        let verified = verification::diff(before, after, (self.now_ms)());

        match verification::apply_outcome_policy(task.task_type, &verified) {
            Ok(()) => {
                let updated = self
                    .queue
                    .transition(&task.id, TaskState::Complete)
                    .await
                    .expect("RUNNING -> COMPLETE is always valid");
                self.emit_evidence(&updated, "COMPLETE", "live", verified, &stdout, &stderr, None);
                self.print_summary(ImmediateSummary::complete(&task.id));
            }
            Err(_) => {
                let updated = self
                    .queue
                    .transition(&task.id, TaskState::Incomplete)
                    .await
                    .expect("RUNNING -> INCOMPLETE is always valid");
                self.emit_evidence(
                    &updated,
                    "INCOMPLETE",
                    "live",
                    verified,
                    &stdout,
                    &stderr,
                    Some("no_file_changes_verified".to_string()),
                );
                self.print_summary(ImmediateSummary::non_complete(
                    "INCOMPLETE",
                    &task.id,
                    Some("no_file_changes_verified"),
                ));
            }
        }

        self.durable_store.update_status(&self.queue.find(&task.id).await.unwrap(), &self.session_id);
    }

    async fn finish_incomplete(&self, task: &Task, reason: &str, stdout: String, stderr: String) {
        let updated = self
            .queue
            .transition(&task.id, TaskState::Incomplete)
            .await
            .expect("RUNNING -> INCOMPLETE is always valid");
        self.emit_evidence(&updated, "INCOMPLETE", "recovery-stub", vec![], &stdout, &stderr, Some(reason.to_string()));
        self.print_summary(ImmediateSummary::non_complete("INCOMPLETE", &task.id, Some(reason)));
        self.durable_store.update_status(&updated, &self.session_id);
    }

    async fn finish_error(&self, task: &Task, exit_code: Option<i32>, stdout: String, stderr: String) {
        let reason = exit_code.map(|c| format!("exit_code_{c}"));
        let updated = self
            .queue
            .transition(&task.id, TaskState::Error)
            .await
            .expect("RUNNING -> ERROR is always valid");
        self.emit_evidence(&updated, "ERROR", "live", vec![], &stdout, &stderr, reason.clone());
        self.print_summary(ImmediateSummary::non_complete("ERROR", &task.id, reason.as_deref()));
        self.durable_store.update_status(&updated, &self.session_id);
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_evidence(
        &self,
        task: &Task,
        outcome: &str,
        execution_mode: &str,
        verified: Vec<crate::domain::VerifiedFile>,
        stdout: &str,
        stderr: &str,
        reason: Option<String>,
    ) {
        let stdout = self.redactor.redact_text(&truncate_tail(stdout));
        let stderr = self.redactor.redact_text(&truncate_tail(stderr));
        let evidence = EvidenceRecord::new(task.id.clone(), (self.now_ms)(), outcome, execution_mode, verified, stdout, stderr, reason);
        let payload = self
            .redactor
            .redact_value(&serde_json::to_value(&evidence).unwrap_or_default());
        self.events.emit(
            EventRecord::new(EventSource::Task, payload)
                .with_task(task.id.clone())
                .with_session(self.session_id.clone()),
        );
    }

    fn print_summary(&self, summary: ImmediateSummary) {
        // Emitted contiguously on stdout; never interleaved with task output.
        println!("{}", summary.render());
    }
}

fn truncate_tail(s: &str) -> String {
    const TAIL_BYTES: usize = 4096;
    if s.len() <= TAIL_BYTES {
        return s.to_string();
    }
    let start = s.len() - TAIL_BYTES;
    let mut start = start;
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

/// Resolve the per-task hard timeout: the minimum of the configured budget
/// and any caller-supplied deadline.
pub fn effective_timeout(configured: Duration, caller_supplied: Option<Duration>) -> Duration {
    match caller_supplied {
        Some(d) => d.min(configured),
        None => configured,
    }
}
