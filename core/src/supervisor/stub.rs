use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::SupervisorError;

use super::executor_trait::{Executor, ExecutorOutcome, ExecutorRequest, ResponseHandle};

/// Deterministic behaviors a `StubExecutor` can be configured to exhibit.
/// The `recovery-stub` execution-mode marker is attached by the caller when
/// constructing the owning `Supervisor`, not by the stub itself.
#[derive(Debug, Clone)]
pub enum StubBehavior {
    CompleteImmediately { stdout: String },
    SleepThenComplete { sleep: Duration },
    ExitNonZero { code: i32 },
    BlockOnInput { reason: String },
    AskUser { question: String, options: Vec<String> },
}

/// Test-only `Executor` implementation: stateless aside from a call counter,
/// used to drive the supervisor/worker/broker through recovery scenarios
/// without a live LLM-backed subprocess.
pub struct StubExecutor {
    behavior: StubBehavior,
    call_count: AtomicUsize,
}

impl StubExecutor {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for StubExecutor {
    async fn invoke(&self, _request: ExecutorRequest, responder: Arc<dyn ResponseHandle>) -> Result<ExecutorOutcome, SupervisorError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        debug!(behavior = ?self.behavior, "StubExecutor::invoke");

        match &self.behavior {
            StubBehavior::CompleteImmediately { stdout } => Ok(ExecutorOutcome {
                exit_code: Some(0),
                stdout: stdout.clone(),
                stderr: String::new(),
                blocked_reason: None,
            }),
            StubBehavior::SleepThenComplete { sleep } => {
                tokio::time::sleep(*sleep).await;
                Ok(ExecutorOutcome {
                    exit_code: Some(0),
                    stdout: String::new(),
                    stderr: String::new(),
                    blocked_reason: None,
                })
            }
            StubBehavior::ExitNonZero { code } => Ok(ExecutorOutcome {
                exit_code: Some(*code),
                stdout: String::new(),
                stderr: format!("stub exited with code {code}"),
                blocked_reason: None,
            }),
            StubBehavior::BlockOnInput { reason } => Ok(ExecutorOutcome {
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                blocked_reason: Some(reason.clone()),
            }),
            StubBehavior::AskUser { question, options } => {
                // Mirrors what a real `ProcessExecutor` does on a `CLARIFY:`
                // line: ask mid-invocation and resume with the answer,
                // rather than returning a separate terminal "clarify" result.
                let answer = responder.ask_user(question.clone(), options.clone(), None).await?;
                Ok(ExecutorOutcome {
                    exit_code: Some(0),
                    stdout: format!("received answer: {answer}"),
                    stderr: String::new(),
                    blocked_reason: None,
                })
            }
        }
    }

    async fn terminate(&self, force: bool) {
        debug!(force, "StubExecutor::terminate");
    }
}
