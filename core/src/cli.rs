//! Command-line surface: argument parsing, the batch/interactive dispatch
//! decision, and the exit-code mapping for batch mode.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::domain::TaskState;

#[derive(Debug, Parser)]
#[command(name = "forge", version, about = "Task orchestrator: dispatches tasks to a supervised executor")]
pub struct Cli {
    /// Path to a config file, overriding the usual .forge.yml / XDG lookup.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Tracing filter directive, e.g. "info" or "forge_core=debug".
    #[arg(long, short = 'l', global = true, default_value = "info")]
    pub log_level: String,

    /// How the verification root is selected.
    #[arg(long, value_enum, global = true, default_value_t = ProjectModeArg::Cwd)]
    pub project_mode: ProjectModeArg,

    /// Required when --project-mode=fixed; must already exist.
    #[arg(long, global = true)]
    pub project_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProjectModeArg {
    Cwd,
    Temp,
    Fixed,
}

impl From<ProjectModeArg> for crate::domain::ProjectMode {
    fn from(value: ProjectModeArg) -> Self {
        match value {
            ProjectModeArg::Cwd => crate::domain::ProjectMode::Cwd,
            ProjectModeArg::Temp => crate::domain::ProjectMode::Temp,
            ProjectModeArg::Fixed => crate::domain::ProjectMode::Fixed,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a single task non-interactively and exit once it reaches a
    /// terminal state.
    Run {
        /// The task description, forwarded verbatim to the executor.
        task: String,

        /// Per-task override of the configured hard timeout; never
        /// exceeds the configured value (see `worker::effective_timeout`).
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Start the interactive console explicitly (the default with no
    /// subcommand at all).
    Repl,
}

/// Whether `Cli` resolves to batch mode or the interactive console.
pub enum Mode {
    Batch { task: String, timeout_ms: Option<u64> },
    Interactive,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        match &self.command {
            Some(Command::Run { task, timeout_ms }) => Mode::Batch {
                task: task.clone(),
                timeout_ms: *timeout_ms,
            },
            Some(Command::Repl) | None => Mode::Interactive,
        }
    }
}

/// Maps the final states of every task dispatched in a session to a
/// process exit code: 0 if every task completed, 2 if at least one
/// task ended INCOMPLETE and none ended ERROR, 1 if any task ended
/// ERROR or the session itself failed to run.
pub fn exit_code_for(states: &[TaskState]) -> i32 {
    if states.iter().any(|s| *s == TaskState::Error) {
        1
    } else if states.iter().any(|s| *s == TaskState::Incomplete) {
        2
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_defaults_to_interactive() {
        let cli = Cli::parse_from(["forge"]);
        assert!(matches!(cli.mode(), Mode::Interactive));
    }

    #[test]
    fn run_subcommand_parses_task_and_timeout() {
        let cli = Cli::parse_from(["forge", "run", "fix the build", "--timeout-ms", "5000"]);
        match cli.mode() {
            Mode::Batch { task, timeout_ms } => {
                assert_eq!(task, "fix the build");
                assert_eq!(timeout_ms, Some(5000));
            }
            Mode::Interactive => panic!("expected batch mode"),
        }
    }

    #[test]
    fn explicit_repl_subcommand_is_interactive() {
        let cli = Cli::parse_from(["forge", "repl"]);
        assert!(matches!(cli.mode(), Mode::Interactive));
    }

    #[test]
    fn project_mode_defaults_to_cwd() {
        let cli = Cli::parse_from(["forge"]);
        assert_eq!(cli.project_mode, ProjectModeArg::Cwd);
    }

    #[test]
    fn exit_code_all_complete_is_zero() {
        assert_eq!(exit_code_for(&[TaskState::Complete, TaskState::Complete]), 0);
    }

    #[test]
    fn exit_code_any_incomplete_without_error_is_two() {
        assert_eq!(exit_code_for(&[TaskState::Complete, TaskState::Incomplete]), 2);
    }

    #[test]
    fn exit_code_any_error_wins_over_incomplete() {
        assert_eq!(exit_code_for(&[TaskState::Incomplete, TaskState::Error]), 1);
    }

    #[test]
    fn exit_code_empty_is_zero() {
        assert_eq!(exit_code_for(&[]), 0);
    }
}
