//! The interactive console: a rustyline loop over slash commands, bare
//! task descriptions, and clarification responses.

use std::sync::Arc;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::clarification::ClarificationBroker;
use crate::domain::TaskState;
use crate::eventlog::EventLogger;
use crate::queue::TaskQueue;

pub struct ReplSession {
    queue: Arc<TaskQueue>,
    broker: ClarificationBroker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Quit,
}

impl ReplSession {
    pub fn new(queue: Arc<TaskQueue>, broker: ClarificationBroker) -> Self {
        Self { queue, broker }
    }

    pub async fn run(&self, events: Arc<tokio::sync::Mutex<EventLogger>>) -> eyre::Result<()> {
        self.print_welcome();

        let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("failed to initialize readline: {e}"))?;

        loop {
            let readline = rl.readline(&format!("{} ", ">".bright_green()));
            match readline {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(input);

                    match self.handle_line(input, &events).await {
                        Outcome::Continue => continue,
                        Outcome::Quit => break,
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => {
                    return Err(eyre::eyre!("readline error: {err}"));
                }
            }
        }

        println!("Goodbye!");
        Ok(())
    }

    fn print_welcome(&self) {
        println!();
        println!("{}", "Forge Task Orchestrator".bright_cyan().bold());
        println!(
            "Type a task description to enqueue it, {} for help, {} to quit",
            "/help".yellow(),
            "/exit".yellow()
        );
        println!();
    }

    /// Dispatch one line of console input. Exposed for scenario tests that
    /// drive the console layer without a real terminal; `run`'s readline
    /// loop is the only other caller.
    pub async fn handle_line(&self, input: &str, events: &Arc<tokio::sync::Mutex<EventLogger>>) -> Outcome {
        if input == "exit" {
            // A bare "exit" is never forwarded as a task description: it
            // would otherwise silently enqueue a task nobody meant to run.
            println!("'exit' is not a command.");
            println!("Use /exit or /quit to leave.");
            return Outcome::Continue;
        }

        if let Some(rest) = input.strip_prefix('/') {
            return self.handle_slash_command(rest, events).await;
        }

        if let Some(answer) = input.strip_prefix("respond ") {
            return self.handle_respond(None, answer.trim()).await;
        }

        let task_id = self.queue.enqueue(input).await;
        println!("{} {}", "enqueued".dimmed(), task_id);
        Outcome::Continue
    }

    async fn handle_slash_command(&self, rest: &str, events: &Arc<tokio::sync::Mutex<EventLogger>>) -> Outcome {
        let mut parts = rest.split_whitespace();
        let cmd = parts.next().unwrap_or("");

        match cmd {
            "exit" | "quit" | "q" => Outcome::Quit,
            "help" | "h" => {
                self.print_help();
                Outcome::Continue
            }
            "tasks" => {
                self.print_tasks().await;
                Outcome::Continue
            }
            "logs" => {
                let task_id = parts.next();
                self.print_logs(task_id, events).await;
                Outcome::Continue
            }
            "respond" => {
                let task_id = parts.next().map(str::to_string);
                let answer = parts.collect::<Vec<_>>().join(" ");
                self.handle_respond(task_id, &answer).await
            }
            other => {
                println!("{} unknown command: /{}", "?".yellow(), other);
                println!("Type {} for available commands", "/help".yellow());
                Outcome::Continue
            }
        }
    }

    async fn handle_respond(&self, task_id: Option<String>, answer: &str) -> Outcome {
        if answer.is_empty() {
            println!("{}", "response text must not be empty".red());
            return Outcome::Continue;
        }
        match self.broker.respond(task_id, answer).await {
            Ok(resolved) => println!("{} {}", "resolved".dimmed(), resolved),
            Err(err) => println!("{} {}", "error:".red(), err),
        }
        Outcome::Continue
    }

    fn print_help(&self) {
        println!();
        println!("{}", "Commands:".bright_cyan());
        println!("  {:24} show this help", "/help".yellow());
        println!("  {:24} exit the session", "/exit, /quit".yellow());
        println!("  {:24} list all tasks and their state", "/tasks".yellow());
        println!("  {:24} show events for a task (all tasks if omitted)", "/logs [task_id]".yellow());
        println!("  {:24} answer the pending clarification", "/respond [task_id] <answer>".yellow());
        println!("  {:24} enqueue a task described in plain text", "<anything else>".yellow());
        println!();
    }

    async fn print_tasks(&self) {
        let tasks = self.queue.snapshot().await;
        if tasks.is_empty() {
            println!("{}", "no tasks".dimmed());
            return;
        }
        for task in tasks {
            println!("{:10} {:18} {}", task.id, format!("{:?}", task.state), task.description);
        }
    }

    async fn print_logs(&self, task_id: Option<&str>, events: &Arc<tokio::sync::Mutex<EventLogger>>) {
        let logger = events.lock().await;
        let matches = logger.query(|e| task_id.map(|id| e.task_id.as_deref() == Some(id)).unwrap_or(true));
        if matches.is_empty() {
            println!("{}", "no events".dimmed());
            return;
        }
        for event in matches {
            println!("{} {:?} {}", event.timestamp, event.source, event.payload);
        }
    }
}

/// Render the terminal summary line shown when the session closes: how
/// many tasks landed in each terminal state.
pub fn render_close_summary(states: &[TaskState]) -> String {
    let complete = states.iter().filter(|s| **s == TaskState::Complete).count();
    let incomplete = states.iter().filter(|s| **s == TaskState::Incomplete).count();
    let error = states.iter().filter(|s| **s == TaskState::Error).count();
    format!("COMPLETE: {complete}, INCOMPLETE: {incomplete}, ERROR: {error}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_summary_counts_each_terminal_state() {
        let states = vec![TaskState::Complete, TaskState::Complete, TaskState::Incomplete, TaskState::Error];
        assert_eq!(render_close_summary(&states), "COMPLETE: 2, INCOMPLETE: 1, ERROR: 1");
    }

    #[test]
    fn close_summary_on_empty_input() {
        assert_eq!(render_close_summary(&[]), "COMPLETE: 0, INCOMPLETE: 0, ERROR: 0");
    }
}
