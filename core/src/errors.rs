//! Per-component error enums. `main.rs`/`cli.rs` wrap these in `eyre::Result`
//! for top-level reporting; errors inside the worker or input dispatcher
//! never unwind past their owning loop.

use crate::domain::TaskState;

/// Task Queue contract violations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("task {task_id} cannot transition {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("unknown task id: {task_id}")]
    UnknownTask { task_id: String },
}

/// Executor Supervisor failures.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("executor exceeded its hard timeout of {budget_ms}ms")]
    Timeout { budget_ms: u64 },

    #[error("executor signalled it cannot proceed: {reason}")]
    Blocked { reason: String },

    #[error("executor exited with status {exit_code:?}: {stderr_tail}")]
    ExecutorFailed { exit_code: Option<i32>, stderr_tail: String },

    #[error("failed to spawn executor: {0}")]
    SpawnFailed(String),

    #[error("clarification failed mid-run: {0}")]
    ClarificationFailed(String),
}

/// Clarification Broker contract failures.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("a clarification is already pending for task {pending_task_id}")]
    OverlappingClarification { pending_task_id: String },

    #[error("session closed with a clarification still pending")]
    SessionClosed,

    #[error("no clarification is pending for task {task_id}")]
    NoPendingClarification { task_id: String },

    #[error("ambiguous respond: {count} tasks are awaiting a response, an explicit task id is required")]
    AmbiguousTarget { count: usize },
}

/// Verification pass failures.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("expected file changes were not observed for an IMPLEMENTATION task")]
    NoFileChangesVerified,

    #[error("failed to inspect verification root: {0}")]
    Io(#[from] std::io::Error),
}

/// Session lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Terminates the process; the one error kind here that does.
    #[error("failed to persist session state: {0}")]
    PersistFailed(String),

    #[error("fixed project path does not exist: {0}")]
    FixedPathMissing(std::path::PathBuf),

    #[error("another session already holds the lock at {0}")]
    AlreadyLocked(std::path::PathBuf),

    #[error("project structure validation failed: {0}")]
    InvalidProjectStructure(String),
}

/// Console-facing failures: malformed command, unknown task id, empty
/// response. Recovered locally, surfaced as a single line; never affects
/// session state.
#[derive(Debug, thiserror::Error)]
pub enum UserInputError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("unknown task id: {0}")]
    UnknownTaskId(String),

    #[error("response text must not be empty")]
    EmptyResponse,

    #[error("bare 'exit' is not a command; did you mean /exit or /quit?")]
    BareExit,
}

/// Fail-closed precondition gating natural-language input; the core defines
/// it so the worker can refuse to dequeue while it is pending even though
/// the admin layer that resolves it is out of scope here.
#[derive(Debug, thiserror::Error)]
#[error("a required credential is not configured; use the admin path to set it up")]
pub struct KeySetupRequired;
