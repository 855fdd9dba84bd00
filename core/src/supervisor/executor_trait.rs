use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::TaskType;
use crate::errors::SupervisorError;

/// What an `Executor` is invoked with.
#[derive(Debug, Clone)]
pub struct ExecutorRequest {
    pub project_path: String,
    pub verification_root: String,
    pub prompt: String,
    pub task_type: TaskType,
}

impl ExecutorRequest {
    pub fn new(
        project_path: impl Into<String>,
        verification_root: impl Into<String>,
        prompt: impl Into<String>,
        task_type: TaskType,
    ) -> Self {
        Self {
            project_path: project_path.into(),
            verification_root: verification_root.into(),
            prompt: prompt.into(),
            task_type,
        }
    }
}

/// The raw result of one executor invocation, after any mid-run
/// clarification has already been asked and answered via `ResponseHandle`.
/// `blocked_reason` covers a distinct case: the executor cannot proceed at
/// all (e.g. a missing credential), not a question it can resume from.
#[derive(Debug, Clone, Default)]
pub struct ExecutorOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub blocked_reason: Option<String>,
}

/// Narrow callback interface an executor uses to invoke the Clarification
/// Broker; kept separate from the broker itself so the supervisor/executor
/// boundary stays acyclic. `invoke` is handed one of these and calls
/// `ask_user` mid-run, awaiting the reply before continuing — the task
/// surfaces as AWAITING_RESPONSE for as long as that await is pending.
#[async_trait]
pub trait ResponseHandle: Send + Sync {
    async fn ask_user(
        &self,
        question: String,
        options: Vec<String>,
        context: Option<serde_json::Value>,
    ) -> Result<String, SupervisorError>;
}

/// Always answers immediately with a fixed string; used where no live
/// broker is wired (supervisor/executor unit tests).
pub struct StaticResponder(pub String);

#[async_trait]
impl ResponseHandle for StaticResponder {
    async fn ask_user(&self, _question: String, _options: Vec<String>, _context: Option<serde_json::Value>) -> Result<String, SupervisorError> {
        Ok(self.0.clone())
    }
}

/// A pluggable LLM-backed execution engine. Implementations must tolerate
/// forced termination between output writes. `responder` is how the
/// executor raises a clarification mid-invocation and resumes with the
/// answer, instead of returning early and requiring the caller to re-drive
/// a second invocation.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn invoke(&self, request: ExecutorRequest, responder: Arc<dyn ResponseHandle>) -> Result<ExecutorOutcome, SupervisorError>;

    /// Terminate the in-flight invocation. `force` selects forced kill over
    /// a graceful signal; called at most once per phase by the supervisor
    /// (double-termination safety lives in `Supervisor`, not here).
    async fn terminate(&self, force: bool);
}
