mod executor_trait;
mod process;
mod stub;

pub use executor_trait::{Executor, ExecutorOutcome, ExecutorRequest, ResponseHandle, StaticResponder};
pub use process::ProcessExecutor;
pub use stub::{StubBehavior, StubExecutor};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::TaskType;
use crate::errors::SupervisorError;

/// The classified result of a supervised executor run. Represented as a
/// tagged variant, never as an exception, so the worker can match
/// exhaustively instead of unwinding.
#[derive(Debug, Clone)]
pub enum SupervisorOutcome {
    Ok {
        stdout: String,
        stderr: String,
    },
    Timeout {
        stdout: String,
        stderr: String,
    },
    Blocked {
        reason: String,
        stdout: String,
        stderr: String,
    },
    Error {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

impl SupervisorOutcome {
    pub fn execution_mode(&self) -> &'static str {
        // Real classification is carried by the `Executor` implementation;
        // callers pass it alongside the outcome. Kept here as a fallback
        // label for outcomes that never reached an executor at all.
        "unknown"
    }
}

/// Truncate `data` to at most `limit` bytes (on a UTF-8 boundary), appending
/// a visible marker recording how many bytes were dropped.
pub fn truncate_capture(data: &str, limit: usize) -> String {
    if data.len() <= limit {
        return data.to_string();
    }
    let mut end = limit;
    while end > 0 && !data.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...\n[truncated, {} bytes total]", &data[..end], data.len())
}

/// Wraps an `Executor` invocation with a hard wall-clock timeout, bounded
/// output capture, and graceful-then-forced termination on timeout.
/// `terminated` guards against acting on a subprocess twice.
pub struct Supervisor {
    executor: Arc<dyn Executor>,
    execution_mode: String,
    hard_timeout: Duration,
    grace_window: Duration,
    output_capture_bytes: usize,
    terminated: AtomicBool,
}

impl Supervisor {
    pub fn new(
        executor: Arc<dyn Executor>,
        execution_mode: impl Into<String>,
        hard_timeout: Duration,
        grace_window: Duration,
        output_capture_bytes: usize,
    ) -> Self {
        Self {
            executor,
            execution_mode: execution_mode.into(),
            hard_timeout,
            grace_window,
            output_capture_bytes,
            terminated: AtomicBool::new(false),
        }
    }

    pub fn execution_mode(&self) -> &str {
        &self.execution_mode
    }

    /// Drive one executor invocation to completion, classifying the result.
    /// `deadline_override`, if present, is intersected with the configured
    /// hard timeout: the effective budget is always the minimum of the two.
    /// `responder` is handed to the executor so it can raise and await a
    /// mid-run clarification itself; the whole invocation — including any
    /// time spent waiting on the user — counts against `budget`.
    pub async fn run(
        &self,
        request: ExecutorRequest,
        task_type: TaskType,
        deadline_override: Option<Duration>,
        responder: Arc<dyn ResponseHandle>,
    ) -> Result<SupervisorOutcome, SupervisorError> {
        let budget = match deadline_override {
            Some(d) => d.min(self.hard_timeout),
            None => self.hard_timeout,
        };

        debug!(budget_ms = budget.as_millis() as u64, ?task_type, "Supervisor::run");

        match tokio::time::timeout(budget, self.executor.invoke(request, responder)).await {
            Ok(Ok(outcome)) => {
                let outcome = self.bound_outputs(outcome);
                Ok(self.classify(outcome))
            }
            Ok(Err(fault)) => {
                warn!(error = %fault, "executor invocation failed");
                Err(fault)
            }
            Err(_elapsed) => {
                self.terminate_on_timeout().await;
                Ok(SupervisorOutcome::Timeout {
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
        }
    }

    fn bound_outputs(&self, outcome: ExecutorOutcome) -> ExecutorOutcome {
        ExecutorOutcome {
            stdout: truncate_capture(&outcome.stdout, self.output_capture_bytes),
            stderr: truncate_capture(&outcome.stderr, self.output_capture_bytes),
            ..outcome
        }
    }

    fn classify(&self, outcome: ExecutorOutcome) -> SupervisorOutcome {
        if let Some(reason) = outcome.blocked_reason {
            return SupervisorOutcome::Blocked {
                reason,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
            };
        }
        if outcome.exit_code == Some(0) {
            SupervisorOutcome::Ok {
                stdout: outcome.stdout,
                stderr: outcome.stderr,
            }
        } else {
            SupervisorOutcome::Error {
                exit_code: outcome.exit_code,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
            }
        }
    }

    /// Graceful signal first, forced kill after `grace_window`; idempotent
    /// via the `terminated` flag.
    async fn terminate_on_timeout(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            debug!("terminate_on_timeout: already terminated, ignoring");
            return;
        }
        warn!("executor exceeded hard timeout, sending graceful termination");
        self.executor.terminate(false).await;
        tokio::time::sleep(self.grace_window).await;
        debug!("grace window elapsed, forcing termination");
        self.executor.terminate(true).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_under_limit_is_unchanged() {
        let data = "hello";
        assert_eq!(truncate_capture(data, 100), "hello");
    }

    #[test]
    fn truncate_over_limit_adds_marker() {
        let data = "x".repeat(20);
        let truncated = truncate_capture(&data, 10);
        assert!(truncated.starts_with(&"x".repeat(10)));
        assert!(truncated.contains("[truncated, 20 bytes total]"));
    }

    fn null_responder() -> Arc<dyn ResponseHandle> {
        Arc::new(StaticResponder("unused".to_string()))
    }

    #[tokio::test]
    async fn ok_exit_classifies_as_ok() {
        let executor = Arc::new(StubExecutor::new(StubBehavior::CompleteImmediately {
            stdout: "done".to_string(),
        }));
        let supervisor = Supervisor::new(executor, "recovery-stub", Duration::from_secs(5), Duration::from_millis(50), 1024);
        let req = ExecutorRequest::new("proj", "verify", "do it", TaskType::Implementation);
        let outcome = supervisor.run(req, TaskType::Implementation, None, null_responder()).await.unwrap();
        assert!(matches!(outcome, SupervisorOutcome::Ok { .. }));
    }

    #[tokio::test]
    async fn slow_executor_times_out() {
        let executor = Arc::new(StubExecutor::new(StubBehavior::SleepThenComplete {
            sleep: Duration::from_millis(200),
        }));
        let supervisor = Supervisor::new(
            executor,
            "recovery-stub",
            Duration::from_millis(20),
            Duration::from_millis(10),
            1024,
        );
        let req = ExecutorRequest::new("proj", "verify", "do it", TaskType::Implementation);
        let outcome = supervisor.run(req, TaskType::Implementation, None, null_responder()).await.unwrap();
        assert!(matches!(outcome, SupervisorOutcome::Timeout { .. }));
    }

    #[tokio::test]
    async fn nonzero_exit_classifies_as_error() {
        let executor = Arc::new(StubExecutor::new(StubBehavior::ExitNonZero { code: 1 }));
        let supervisor = Supervisor::new(executor, "recovery-stub", Duration::from_secs(5), Duration::from_millis(50), 1024);
        let req = ExecutorRequest::new("proj", "verify", "do it", TaskType::Implementation);
        let outcome = supervisor.run(req, TaskType::Implementation, None, null_responder()).await.unwrap();
        assert!(matches!(outcome, SupervisorOutcome::Error { .. }));
    }

    #[tokio::test]
    async fn ask_user_resumes_and_classifies_as_ok() {
        let executor = Arc::new(StubExecutor::new(StubBehavior::AskUser {
            question: "Which format?".to_string(),
            options: vec!["json".to_string(), "yaml".to_string()],
        }));
        let supervisor = Supervisor::new(executor, "recovery-stub", Duration::from_secs(5), Duration::from_millis(50), 1024);
        let req = ExecutorRequest::new("proj", "verify", "do it", TaskType::Implementation);
        let responder: Arc<dyn ResponseHandle> = Arc::new(StaticResponder("json".to_string()));
        let outcome = supervisor.run(req, TaskType::Implementation, None, responder).await.unwrap();
        match outcome {
            SupervisorOutcome::Ok { stdout, .. } => assert!(stdout.contains("json")),
            other => panic!("expected Ok, got {other:?}"),
        }
    }
}
